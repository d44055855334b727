use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use super::QuestionStore;
use crate::config::DatabaseSettings;
use crate::model::{Question, QuestionBank};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Direct pooled connection. Every value travels as a bind parameter.
///
/// The rest of the crate is synchronous, so the store owns a current-thread
/// runtime and blocks on each query.
pub struct PostgresStore {
    runtime: Runtime,
    pool: PgPool,
}

impl PostgresStore {
    pub fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let options = connect_options(settings)?;
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start database runtime")?;

        let pool = runtime.block_on(async {
            let pool = PgPoolOptions::new()
                .max_connections(settings.pool_max)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect_with(options)
                .await
                .context("failed to connect to postgres")?;
            sqlx::query("SELECT 1")
                .execute(&pool)
                .await
                .context("postgres health check failed")?;
            anyhow::Ok(pool)
        })?;

        info!(
            host = %settings.host.as_deref().unwrap_or("(from DATABASE_URL)"),
            database = %settings.database,
            pool_max = settings.pool_max,
            "connected to postgres"
        );
        Ok(Self { runtime, pool })
    }
}

fn connect_options(settings: &DatabaseSettings) -> Result<PgConnectOptions> {
    if let Some(url) = &settings.url {
        return PgConnectOptions::from_str(url).context("DATABASE_URL is not a valid postgres url");
    }

    let mut options = PgConnectOptions::new()
        .port(settings.port)
        .username(&settings.user)
        .database(&settings.database);
    if let Some(host) = &settings.host {
        options = options.host(host);
    }
    if let Some(password) = &settings.password {
        options = options.password(password);
    }
    Ok(options)
}

async fn find_bank(pool: &PgPool, name: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id::bigint FROM question_banks WHERE name = $1 LIMIT 1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to look up question bank {name}"))?;
    Ok(id)
}

async fn create_bank(pool: &PgPool, bank: &QuestionBank) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO question_banks (name, description, category, difficulty, inserted_at, updated_at)
         VALUES ($1, $2, $3, $4, NOW(), NOW())
         RETURNING id::bigint",
    )
    .bind(&bank.name)
    .bind(&bank.description)
    .bind(&bank.category)
    .bind(&bank.difficulty)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to create question bank {}", bank.name))?;
    Ok(id)
}

async fn insert_question(pool: &PgPool, bank_id: i64, question: &Question) -> Result<()> {
    sqlx::query(
        "INSERT INTO questions (
           question_bank_id, question_type, question_text, difficulty, topic,
           learning_objective, ase_standard, points, question_data, explanation,
           active, inserted_at, updated_at
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9::jsonb, $10, true, NOW(), NOW())",
    )
    .bind(bank_id)
    .bind(question.question_type.as_str())
    .bind(&question.question_text)
    .bind(question.difficulty.as_str())
    .bind(&question.topic)
    .bind(&question.learning_objective)
    .bind(&question.ase_standard)
    .bind(question.points)
    .bind(question.question_data_json())
    .bind(&question.explanation)
    .execute(pool)
    .await
    .context("failed to insert question")?;
    Ok(())
}

impl QuestionStore for PostgresStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    fn get_or_create_bank(&mut self, bank: &QuestionBank) -> Result<i64> {
        let pool = &self.pool;
        self.runtime.block_on(async {
            match find_bank(pool, &bank.name).await? {
                Some(id) => Ok(id),
                None => create_bank(pool, bank).await,
            }
        })
    }

    fn insert_question(&mut self, bank_id: i64, question: &Question) -> Result<()> {
        self.runtime
            .block_on(insert_question(&self.pool, bank_id, question))
    }
}

#[cfg(test)]
mod tests {
    use super::connect_options;
    use crate::config::DatabaseSettings;

    #[test]
    fn invalid_database_url_is_reported() {
        let settings = DatabaseSettings {
            direct_requested: true,
            url: Some("not a url".to_string()),
            host: None,
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            database: "lms_api_prod".to_string(),
            pool_max: 10,
            namespace: "autolearnpro".to_string(),
        };

        let err = connect_options(&settings).expect_err("bad url");
        assert!(err.to_string().contains("DATABASE_URL"));
    }
}
