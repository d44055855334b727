mod pod;
mod postgres;
mod sqlite;

use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, warn};

use crate::cli::StoreBackend;
use crate::config::DatabaseSettings;
use crate::model::{Question, QuestionBank};

pub use pod::PodStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Where generated questions end up.
pub trait QuestionStore {
    fn backend_name(&self) -> &'static str;

    /// Looks the bank up by name and creates it when missing. The lookup and
    /// the insert are separate statements, so concurrent runs can race.
    fn get_or_create_bank(&mut self, bank: &QuestionBank) -> Result<i64>;

    fn insert_question(&mut self, bank_id: i64, question: &Question) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct StoreRetry {
    pub attempts: usize,
    pub step: Duration,
}

impl Default for StoreRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            step: Duration::from_secs(5),
        }
    }
}

/// Runs `op` until it succeeds or the attempt budget is spent, sleeping
/// `step * attempt` between tries. The closure receives the 1-based attempt.
pub fn with_retries<T, F>(label: &str, retry: StoreRetry, mut op: F) -> Result<T>
where
    F: FnMut(usize) -> Result<T>,
{
    let attempts = retry.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(operation = label, attempt, error = %format!("{err:#}"), "store operation failed");
                last_error = Some(err);
            }
        }

        if attempt < attempts && !retry.step.is_zero() {
            thread::sleep(retry.step * attempt as u32);
        }
    }

    let err = last_error.unwrap_or_else(|| anyhow!("{label} never ran"));
    Err(err.context(format!("{label} failed after {attempts} attempts")))
}

/// Opens the configured backend. `auto` prefers a direct connection when one
/// is configured and falls back to the pod path if it cannot connect.
pub fn open_store(
    backend: StoreBackend,
    settings: &DatabaseSettings,
    sqlite_path: &Path,
) -> Result<Box<dyn QuestionStore>> {
    let store: Box<dyn QuestionStore> = match backend {
        StoreBackend::Sqlite => Box::new(SqliteStore::open(sqlite_path)?),
        StoreBackend::Postgres => {
            settings.validate_direct()?;
            Box::new(PostgresStore::connect(settings)?)
        }
        StoreBackend::Pod => Box::new(PodStore::locate(&settings.namespace)?),
        StoreBackend::Auto if settings.direct_requested => {
            match settings
                .validate_direct()
                .and_then(|()| PostgresStore::connect(settings))
            {
                Ok(store) => Box::new(store),
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "direct database unavailable, falling back to pod exec");
                    Box::new(PodStore::locate(&settings.namespace)?)
                }
            }
        }
        StoreBackend::Auto => Box::new(PodStore::locate(&settings.namespace)?),
    };

    info!(
        requested = backend.as_str(),
        backend = store.backend_name(),
        "question store ready"
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use anyhow::bail;

    use super::{StoreRetry, with_retries};

    fn no_wait() -> StoreRetry {
        StoreRetry {
            attempts: 3,
            step: Duration::ZERO,
        }
    }

    #[test]
    fn retries_until_success() {
        let calls = Cell::new(0);
        let value = with_retries("insert", no_wait(), |attempt| {
            calls.set(calls.get() + 1);
            if attempt < 3 {
                bail!("connection refused");
            }
            Ok(attempt * 10)
        })
        .expect("third attempt succeeds");

        assert_eq!(value, 30);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhaustion_returns_last_error_with_context() {
        let calls = Cell::new(0);
        let err = with_retries::<(), _>("bank lookup", no_wait(), |attempt| {
            calls.set(calls.get() + 1);
            bail!("attempt {attempt} timed out")
        })
        .expect_err("all attempts fail");

        assert_eq!(calls.get(), 3);
        assert!(err.to_string().contains("bank lookup failed after 3 attempts"));
        assert_eq!(err.root_cause().to_string(), "attempt 3 timed out");
    }
}
