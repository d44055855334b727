use std::process::Command;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{debug, info};

use super::QuestionStore;
use crate::config::{DEFAULT_PG_DATABASE, DEFAULT_PG_USER};
use crate::model::{Question, QuestionBank};
use crate::process::run_with_timeout;
use crate::util::truncate_chars;

const POD_SELECTOR: &str = "app=postgres";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
const STATEMENT_TIMEOUT: Duration = Duration::from_secs(120);
const STDERR_LOG_CHARS: usize = 2000;

const FIND_BANK_SQL: &str = "SELECT id FROM question_banks WHERE name = :'name' LIMIT 1;\n";

const CREATE_BANK_SQL: &str = "INSERT INTO question_banks (name, description, category, difficulty, inserted_at, updated_at) \
VALUES (:'name', :'description', :'category', :'difficulty', NOW(), NOW()) RETURNING id;\n";

const INSERT_QUESTION_SQL: &str = "INSERT INTO questions (\
question_bank_id, question_type, question_text, difficulty, topic, \
learning_objective, ase_standard, points, question_data, explanation, \
active, inserted_at, updated_at\
) VALUES (\
:'bank_id'::bigint, :'question_type', :'question_text', :'difficulty', :'topic', \
:'learning_objective', :'ase_standard', :'points'::integer, :'question_data'::jsonb, :'explanation', \
true, NOW(), NOW());\n";

/// Fallback path: `psql` inside the cluster's Postgres pod via `kubectl exec`.
///
/// The SQL text is fixed. Values are handed to psql as `-v` variables and
/// referenced as `:'name'`, which psql quotes as literals.
pub struct PodStore {
    namespace: String,
    pod: String,
}

impl PodStore {
    pub fn locate(namespace: &str) -> Result<Self> {
        let mut command = Command::new("kubectl");
        command.args([
            "get",
            "pod",
            "-n",
            namespace,
            "-l",
            POD_SELECTOR,
            "-o",
            "jsonpath={.items[0].metadata.name}",
        ]);

        let output = run_with_timeout(&mut command, None, LOOKUP_TIMEOUT)?;
        let pod = output.stdout.trim();
        if !output.success() || pod.is_empty() {
            bail!(
                "failed to find postgres pod in namespace {namespace} (code {}): {}",
                output.code,
                output.stderr.trim()
            );
        }

        info!(namespace, pod, "using postgres pod");
        Ok(Self::new(namespace, pod))
    }

    pub fn new(namespace: &str, pod: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
        }
    }

    fn psql_command(&self, variables: &[(&str, String)]) -> Command {
        let mut command = Command::new("kubectl");
        command.args([
            "exec",
            "-i",
            "-n",
            self.namespace.as_str(),
            self.pod.as_str(),
            "--",
            "psql",
            "-U",
            DEFAULT_PG_USER,
            "-d",
            DEFAULT_PG_DATABASE,
            "-q",
            "-t",
            "-A",
            "-v",
            "ON_ERROR_STOP=1",
        ]);
        for (name, value) in variables {
            command.arg("-v").arg(format!("{name}={value}"));
        }
        command.args(["-f", "-"]);
        command
    }

    fn run_sql(&self, sql: &str, variables: &[(&str, String)]) -> Result<String> {
        let mut command = self.psql_command(variables);
        let output = run_with_timeout(&mut command, Some(sql), STATEMENT_TIMEOUT)?;
        if output.timed_out {
            bail!("psql timed out after {}s", STATEMENT_TIMEOUT.as_secs());
        }
        if !output.success() {
            bail!(
                "psql exited with code {}: {}",
                output.code,
                truncate_chars(output.stderr.trim(), STDERR_LOG_CHARS)
            );
        }

        debug!(stdout = %output.stdout.trim(), "psql finished");
        Ok(output.stdout)
    }
}

fn first_id(stdout: &str) -> Option<i64> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<i64>().ok())
}

fn bank_variables(bank: &QuestionBank) -> Vec<(&'static str, String)> {
    vec![
        ("name", bank.name.clone()),
        ("description", bank.description.clone()),
        ("category", bank.category.clone()),
        ("difficulty", bank.difficulty.clone()),
    ]
}

fn question_variables(bank_id: i64, question: &Question) -> Vec<(&'static str, String)> {
    vec![
        ("bank_id", bank_id.to_string()),
        ("question_type", question.question_type.as_str().to_string()),
        ("question_text", question.question_text.clone()),
        ("difficulty", question.difficulty.as_str().to_string()),
        ("topic", question.topic.clone()),
        ("learning_objective", question.learning_objective.clone()),
        ("ase_standard", question.ase_standard.clone()),
        ("points", question.points.to_string()),
        ("question_data", question.question_data_json()),
        ("explanation", question.explanation.clone()),
    ]
}

impl QuestionStore for PodStore {
    fn backend_name(&self) -> &'static str {
        "pod"
    }

    fn get_or_create_bank(&mut self, bank: &QuestionBank) -> Result<i64> {
        let variables = bank_variables(bank);

        let found = self.run_sql(FIND_BANK_SQL, &variables[..1])?;
        if let Some(id) = first_id(&found) {
            return Ok(id);
        }

        let created = self.run_sql(CREATE_BANK_SQL, &variables)?;
        match first_id(&created) {
            Some(id) => Ok(id),
            None => bail!("psql did not return a bank id: {}", created.trim()),
        }
    }

    fn insert_question(&mut self, bank_id: i64, question: &Question) -> Result<()> {
        self.run_sql(INSERT_QUESTION_SQL, &question_variables(bank_id, question))?;
        Ok(())
    }
}
