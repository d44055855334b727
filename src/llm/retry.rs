use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::invoker::{Invocation, ModelInvoker};
use super::prompt::PromptPair;
use super::sanitize::ResponseSanitizer;
use crate::util::{ensure_directory, safe_file_component, utc_compact_string};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Duration,
    pub warmup: Duration,
    pub min_timeout_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(1500),
            warmup: Duration::ZERO,
            min_timeout_cap: Duration::from_secs(600),
        }
    }
}

/// Larger models get proportionally more time. First matching substring wins.
pub fn timeout_multiplier(model: &str) -> u32 {
    const MULTIPLIERS: [(&str, u32); 5] = [
        ("qwen", 4),
        ("8b", 4),
        ("mistral", 2),
        ("llama3", 2),
        ("llama", 2),
    ];

    let model = model.to_ascii_lowercase();
    MULTIPLIERS
        .iter()
        .find(|(needle, _)| model.contains(needle))
        .map(|(_, multiplier)| *multiplier)
        .unwrap_or(1)
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub model: String,
    pub attempt: usize,
    pub timeout_secs: u64,
    pub code: i32,
    pub parsed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FallbackOutcome<T> {
    pub value: Option<T>,
    pub model: Option<String>,
    pub attempts: Vec<AttemptRecord>,
}

impl<T> FallbackOutcome<T> {
    pub fn log_paths(&self) -> Vec<PathBuf> {
        self.attempts
            .iter()
            .filter_map(|attempt| attempt.log_path.clone())
            .collect()
    }
}

/// Walks the model list in priority order, retrying each model a bounded
/// number of times before falling through to the next one.
pub struct FallbackController {
    policy: RetryPolicy,
    sanitizer: ResponseSanitizer,
    log_dir: Option<PathBuf>,
}

impl FallbackController {
    pub fn new(policy: RetryPolicy, log_dir: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = &log_dir {
            ensure_directory(dir)?;
        }

        Ok(Self {
            policy,
            sanitizer: ResponseSanitizer::new()?,
            log_dir,
        })
    }

    /// `accept` turns the sanitized JSON list into the caller's value; a
    /// `None` from it counts as a failed attempt.
    pub fn run<T, F>(
        &self,
        invoker: &dyn ModelInvoker,
        models: &[String],
        base_timeout: Duration,
        prompts: &PromptPair,
        label: &str,
        mut accept: F,
    ) -> FallbackOutcome<T>
    where
        F: FnMut(Vec<Value>) -> Option<T>,
    {
        let mut attempts = Vec::new();

        for model in models {
            let mut timeout = base_timeout * timeout_multiplier(model);
            let cap = (timeout * 4).max(self.policy.min_timeout_cap);

            if !self.policy.warmup.is_zero() {
                debug!(model = %model, warmup_ms = self.policy.warmup.as_millis() as u64, "warming up model");
                thread::sleep(self.policy.warmup);
            }

            for attempt in 1..=self.policy.max_attempts {
                let prompt = prompts.for_attempt(attempt);
                info!(
                    label,
                    model = %model,
                    attempt,
                    timeout_secs = timeout.as_secs(),
                    "invoking model"
                );

                let invocation = invoker.invoke(model, prompt, timeout);
                let mut record = AttemptRecord {
                    model: model.clone(),
                    attempt,
                    timeout_secs: timeout.as_secs(),
                    code: invocation.code,
                    parsed: false,
                    log_path: None,
                };

                if invocation.is_timeout() {
                    record.log_path = self.write_attempt_log(label, &record, prompt, &invocation, None);
                    attempts.push(record);
                    let next = timeout.saturating_mul(2).min(cap);
                    warn!(
                        model = %model,
                        attempt,
                        next_timeout_secs = next.as_secs(),
                        "model timed out"
                    );
                    timeout = next;
                    continue;
                }

                if !invocation.succeeded() {
                    record.log_path = self.write_attempt_log(label, &record, prompt, &invocation, None);
                    attempts.push(record);
                    warn!(
                        model = %model,
                        attempt,
                        code = invocation.code,
                        stderr = %invocation.stderr.trim(),
                        "model call failed"
                    );
                    self.pause();
                    continue;
                }

                let parsed = self.sanitizer.parse(&invocation.stdout);
                record.parsed = parsed.is_some();
                record.log_path =
                    self.write_attempt_log(label, &record, prompt, &invocation, parsed.as_deref());
                attempts.push(record);

                match parsed.and_then(&mut accept) {
                    Some(value) => {
                        info!(label, model = %model, attempt, "model output accepted");
                        return FallbackOutcome {
                            value: Some(value),
                            model: Some(model.clone()),
                            attempts,
                        };
                    }
                    None => {
                        warn!(model = %model, attempt, "model output unusable");
                        self.pause();
                    }
                }
            }

            warn!(label, model = %model, "attempts exhausted, trying next model");
        }

        warn!(label, models = models.len(), "all models exhausted");
        FallbackOutcome {
            value: None,
            model: None,
            attempts,
        }
    }

    fn pause(&self) {
        if !self.policy.backoff.is_zero() {
            thread::sleep(self.policy.backoff);
        }
    }

    fn write_attempt_log(
        &self,
        label: &str,
        record: &AttemptRecord,
        prompt: &str,
        invocation: &Invocation,
        parsed: Option<&[Value]>,
    ) -> Option<PathBuf> {
        let dir = self.log_dir.as_deref()?;
        let path = dir.join(format!(
            "{}_{}_attempt{}_{}.log",
            safe_file_component(label),
            safe_file_component(&record.model),
            record.attempt,
            utc_compact_string(Utc::now())
        ));

        match write_log_file(&path, record, prompt, invocation, parsed) {
            Ok(()) => Some(path),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to write attempt log");
                None
            }
        }
    }
}

fn write_log_file(
    path: &Path,
    record: &AttemptRecord,
    prompt: &str,
    invocation: &Invocation,
    parsed: Option<&[Value]>,
) -> Result<()> {
    let parsed = match parsed {
        Some(items) => serde_json::to_string_pretty(items)
            .context("failed to serialize parsed attempt output")?,
        None => "null".to_string(),
    };

    let mut body = String::new();
    let _ = writeln!(body, "MODEL: {}", record.model);
    let _ = writeln!(body, "ATTEMPT: {}", record.attempt);
    let _ = writeln!(body, "TIMEOUT: {}s", record.timeout_secs);
    let _ = writeln!(body, "PROMPT:\n{prompt}\n");
    let _ = writeln!(body, "RETURN CODE: {}", invocation.code);
    let _ = writeln!(body, "STDOUT:\n{}\n", invocation.stdout);
    let _ = writeln!(body, "STDERR:\n{}\n", invocation.stderr);
    let _ = writeln!(body, "PARSED_JSON:\n{parsed}");

    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}
