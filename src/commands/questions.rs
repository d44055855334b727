use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::checkpoint::ProgressCheckpoint;
use crate::cli::QuestionsArgs;
use crate::config::{DatabaseSettings, GpuPreference};
use crate::llm::prompt::question_prompts;
use crate::llm::{FallbackController, ModelInvoker, OllamaCli, RetryPolicy, configure_ollama_home};
use crate::model::{GenerationTask, Question, QuestionBank};
use crate::questions::{ase_standard_for, calculate_batches, normalize_question};
use crate::store::{QuestionStore, StoreRetry, open_store, with_retries};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub generated: u64,
    pub failed: u64,
    pub batches_run: usize,
    pub interrupted: bool,
    pub total_generated: u64,
}

/// Everything one generation run needs besides the store and checkpoint.
pub struct QuestionRun<'a> {
    pub invoker: &'a dyn ModelInvoker,
    pub controller: &'a FallbackController,
    pub models: &'a [String],
    pub base_timeout: Duration,
    pub store_retry: StoreRetry,
    pub questions_per_run: u64,
    pub total_target: u64,
    pub progress_file: &'a Path,
    pub interrupted: &'a AtomicBool,
}

pub fn run(args: QuestionsArgs) -> Result<()> {
    let models = args
        .models
        .iter()
        .map(|model| model.trim().to_string())
        .filter(|model| !model.is_empty())
        .collect::<Vec<_>>();
    if models.is_empty() {
        bail!("no models configured; pass --models or set OLLAMA_MODEL");
    }

    let plan = calculate_batches(args.questions_per_run);
    let mut checkpoint = ProgressCheckpoint::load(&args.progress_file);

    info!(
        models = %models.join(","),
        batches = plan.len(),
        questions_per_run = args.questions_per_run,
        total_generated = checkpoint.total_generated,
        total_target = args.total_target,
        "question generation plan"
    );

    if args.dry_run {
        for task in &plan {
            info!(
                category = task.category.as_str(),
                question_type = task.question_type.as_str(),
                difficulty = task.difficulty.as_str(),
                count = task.count,
                "planned batch"
            );
        }
        return Ok(());
    }

    let home = configure_ollama_home(args.ollama_home.as_deref());
    let gpu = GpuPreference::detect();
    info!(device = gpu.label(), source = ?gpu.source, "compute preference");

    let invoker = OllamaCli::new(home).with_gpu_hint(gpu.gpu);
    if !invoker.is_available() {
        bail!("ollama CLI not found on PATH");
    }

    let settings = DatabaseSettings::from_env()?.with_namespace(args.namespace.clone());
    let mut store = open_store(args.store, &settings, &args.db_path)?;

    let policy = RetryPolicy {
        max_attempts: args.max_attempts.max(1),
        ..RetryPolicy::default()
    };
    let controller = FallbackController::new(policy, args.attempt_log_dir.clone())?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("failed to install interrupt handler")?;

    let question_run = QuestionRun {
        invoker: &invoker,
        controller: &controller,
        models: &models,
        base_timeout: Duration::from_secs(args.timeout),
        store_retry: StoreRetry::default(),
        questions_per_run: args.questions_per_run as u64,
        total_target: args.total_target,
        progress_file: &args.progress_file,
        interrupted: &interrupted,
    };
    let summary = question_run.execute(store.as_mut(), &plan, &mut checkpoint)?;

    info!(
        backend = store.backend_name(),
        generated = summary.generated,
        failed = summary.failed,
        batches = summary.batches_run,
        interrupted = summary.interrupted,
        total_generated = summary.total_generated,
        total_target = args.total_target,
        percent = %format!("{:.2}", checkpoint.percent_of(args.total_target)),
        runs_remaining = checkpoint.runs_remaining(args.total_target, args.questions_per_run as u64),
        "question generation summary"
    );

    Ok(())
}

impl QuestionRun<'_> {
    /// Walks the plan in order. The checkpoint is saved after every batch so
    /// an interrupted run keeps what it already stored.
    pub fn execute(
        &self,
        store: &mut dyn QuestionStore,
        plan: &[GenerationTask],
        checkpoint: &mut ProgressCheckpoint,
    ) -> Result<RunSummary> {
        let starting_total = checkpoint.total_generated;
        let mut summary = RunSummary {
            total_generated: starting_total,
            ..RunSummary::default()
        };

        for task in plan {
            if self.interrupted.load(Ordering::SeqCst) {
                warn!("interrupted, stopping before next batch");
                summary.interrupted = true;
                break;
            }
            if summary.generated >= self.questions_per_run {
                info!(generated = summary.generated, "per-run quota reached");
                break;
            }
            if checkpoint.total_generated >= self.total_target {
                info!(total = checkpoint.total_generated, "total target reached");
                break;
            }

            let bank = QuestionBank::for_task(task);
            let bank_id = match with_retries("question bank lookup", self.store_retry, |_| {
                store.get_or_create_bank(&bank)
            }) {
                Ok(id) => id,
                Err(err) => {
                    error!(bank = %bank.name, error = %format!("{err:#}"), "skipping batch");
                    summary.failed += task.count as u64;
                    summary.batches_run += 1;
                    continue;
                }
            };

            let (generated, failed) = self.run_batch(store, task, bank_id, &mut summary.interrupted);
            summary.generated += generated;
            summary.failed += failed;
            summary.batches_run += 1;

            checkpoint.record(starting_total + summary.generated);
            checkpoint.save(self.progress_file)?;
            summary.total_generated = checkpoint.total_generated;

            info!(
                bank = %bank.name,
                generated,
                failed,
                run_generated = summary.generated,
                total = checkpoint.total_generated,
                "batch finished"
            );

            if summary.interrupted {
                warn!("interrupted, progress saved");
                break;
            }
        }

        Ok(summary)
    }

    fn run_batch(
        &self,
        store: &mut dyn QuestionStore,
        task: &GenerationTask,
        bank_id: i64,
        interrupted: &mut bool,
    ) -> (u64, u64) {
        let mut generated = 0;
        let mut failed = 0;

        for index in 0..task.count {
            if self.interrupted.load(Ordering::SeqCst) {
                *interrupted = true;
                break;
            }

            let ase_standard = ase_standard_for(task.category, index);
            let prompts = question_prompts(task, ase_standard);
            let label = format!(
                "{}_{}_{}_q{}",
                task.category.as_str(),
                task.question_type.as_str(),
                task.difficulty.as_str(),
                index + 1
            );

            let outcome = self.controller.run(
                self.invoker,
                self.models,
                self.base_timeout,
                &prompts,
                &label,
                |items| accept_question(&items, task, ase_standard),
            );
            let Some(question) = outcome.value else {
                failed += 1;
                continue;
            };

            match with_retries("question insert", self.store_retry, |_| {
                store.insert_question(bank_id, &question)
            }) {
                Ok(()) => generated += 1,
                Err(err) => {
                    error!(label = %label, error = %format!("{err:#}"), "failed to store question");
                    failed += 1;
                }
            }
        }

        (generated, failed)
    }
}

fn accept_question(
    items: &[serde_json::Value],
    task: &GenerationTask,
    ase_standard: &str,
) -> Option<Question> {
    let first = items.first()?;
    match normalize_question(first, task, ase_standard) {
        Ok(question) => Some(question),
        Err(err) => {
            warn!(error = %err, "model output rejected");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use anyhow::{Result, bail};

    use super::{QuestionRun, RunSummary};
    use crate::checkpoint::ProgressCheckpoint;
    use crate::llm::invoker::Invocation;
    use crate::llm::{FallbackController, ModelInvoker, RetryPolicy};
    use crate::model::{
        Category, Difficulty, GenerationTask, Question, QuestionBank, QuestionType,
    };
    use crate::store::{QuestionStore, SqliteStore, StoreRetry};

    struct CannedInvoker {
        reply: String,
        calls: Cell<usize>,
    }

    impl CannedInvoker {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: Cell::new(0),
            }
        }
    }

    impl ModelInvoker for CannedInvoker {
        fn invoke(&self, _model: &str, _prompt: &str, _timeout: Duration) -> Invocation {
            self.calls.set(self.calls.get() + 1);
            Invocation {
                code: 0,
                stdout: self.reply.clone(),
                stderr: String::new(),
            }
        }
    }

    struct BrokenBankStore {
        inserted: RefCell<usize>,
    }

    impl QuestionStore for BrokenBankStore {
        fn backend_name(&self) -> &'static str {
            "broken"
        }

        fn get_or_create_bank(&mut self, _bank: &QuestionBank) -> Result<i64> {
            bail!("connection reset")
        }

        fn insert_question(&mut self, _bank_id: i64, _question: &Question) -> Result<()> {
            *self.inserted.borrow_mut() += 1;
            Ok(())
        }
    }

    const TRUE_FALSE_REPLY: &str = r#"```json
[{"question_type": "true_false", "question_text": "Regenerative braking recharges the pack.", "question_data": {"correct": true}, "topic": "Regen"}]
```"#;

    fn plan() -> Vec<GenerationTask> {
        vec![
            GenerationTask {
                category: Category::Ev,
                question_type: QuestionType::TrueFalse,
                difficulty: Difficulty::Easy,
                count: 2,
            },
            GenerationTask {
                category: Category::Brakes,
                question_type: QuestionType::TrueFalse,
                difficulty: Difficulty::Hard,
                count: 1,
            },
        ]
    }

    fn controller() -> FallbackController {
        let policy = RetryPolicy {
            backoff: Duration::ZERO,
            ..RetryPolicy::default()
        };
        FallbackController::new(policy, None).expect("controller")
    }

    fn no_wait() -> StoreRetry {
        StoreRetry {
            attempts: 2,
            step: Duration::ZERO,
        }
    }

    fn question_run<'a>(
        invoker: &'a dyn ModelInvoker,
        controller: &'a FallbackController,
        models: &'a [String],
        progress_file: &'a std::path::Path,
        interrupted: &'a AtomicBool,
    ) -> QuestionRun<'a> {
        QuestionRun {
            invoker,
            controller,
            models,
            base_timeout: Duration::from_secs(5),
            store_retry: no_wait(),
            questions_per_run: 1000,
            total_target: 200_000,
            progress_file,
            interrupted,
        }
    }

    #[test]
    fn stores_every_accepted_question_and_saves_progress() {
        let dir = tempfile::tempdir().expect("tempdir");
        let progress = dir.path().join("progress.json");
        let invoker = CannedInvoker::new(TRUE_FALSE_REPLY);
        let controller = controller();
        let models = vec!["stub".to_string()];
        let interrupted = AtomicBool::new(false);
        let mut store = SqliteStore::in_memory().expect("store");
        let mut checkpoint = ProgressCheckpoint {
            total_generated: 40,
            last_updated: None,
        };

        let summary = question_run(&invoker, &controller, &models, &progress, &interrupted)
            .execute(&mut store, &plan(), &mut checkpoint)
            .expect("run");

        assert_eq!(
            summary,
            RunSummary {
                generated: 3,
                failed: 0,
                batches_run: 2,
                interrupted: false,
                total_generated: 43,
            }
        );
        assert_eq!(invoker.calls.get(), 3);
        assert_eq!(store.question_count().expect("count"), 3);

        let saved = ProgressCheckpoint::load(&progress);
        assert_eq!(saved.total_generated, 43);
        assert!(saved.last_updated.is_some());
    }

    #[test]
    fn unusable_output_counts_as_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let progress = dir.path().join("progress.json");
        let invoker = CannedInvoker::new(r#"[{"question_type": "true_false"}]"#);
        let controller = controller();
        let models = vec!["stub".to_string()];
        let interrupted = AtomicBool::new(false);
        let mut store = SqliteStore::in_memory().expect("store");
        let mut checkpoint = ProgressCheckpoint::default();

        let summary = question_run(&invoker, &controller, &models, &progress, &interrupted)
            .execute(&mut store, &plan()[1..], &mut checkpoint)
            .expect("run");

        assert_eq!(summary.generated, 0);
        assert_eq!(summary.failed, 1);
        assert_eq!(invoker.calls.get(), 3);
        assert_eq!(store.question_count().expect("count"), 0);
    }

    #[test]
    fn bank_failure_fails_whole_batch_without_model_calls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let progress = dir.path().join("progress.json");
        let invoker = CannedInvoker::new(TRUE_FALSE_REPLY);
        let controller = controller();
        let models = vec!["stub".to_string()];
        let interrupted = AtomicBool::new(false);
        let mut store = BrokenBankStore {
            inserted: RefCell::new(0),
        };
        let mut checkpoint = ProgressCheckpoint::default();

        let summary = question_run(&invoker, &controller, &models, &progress, &interrupted)
            .execute(&mut store, &plan(), &mut checkpoint)
            .expect("run");

        assert_eq!(summary.failed, 3);
        assert_eq!(summary.generated, 0);
        assert_eq!(invoker.calls.get(), 0);
        assert_eq!(*store.inserted.borrow(), 0);
    }

    #[test]
    fn stops_at_per_run_quota_and_total_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let progress = dir.path().join("progress.json");
        let invoker = CannedInvoker::new(TRUE_FALSE_REPLY);
        let controller = controller();
        let models = vec!["stub".to_string()];
        let interrupted = AtomicBool::new(false);
        let mut store = SqliteStore::in_memory().expect("store");

        let mut quota_run = question_run(&invoker, &controller, &models, &progress, &interrupted);
        quota_run.questions_per_run = 2;
        let mut checkpoint = ProgressCheckpoint::default();
        let summary = quota_run
            .execute(&mut store, &plan(), &mut checkpoint)
            .expect("run");
        assert_eq!(summary.generated, 2);
        assert_eq!(summary.batches_run, 1);

        let mut target_run = question_run(&invoker, &controller, &models, &progress, &interrupted);
        target_run.total_target = 10;
        let mut finished = ProgressCheckpoint {
            total_generated: 10,
            last_updated: None,
        };
        let summary = target_run
            .execute(&mut store, &plan(), &mut finished)
            .expect("run");
        assert_eq!(summary.batches_run, 0);
        assert_eq!(invoker.calls.get(), 2);
    }

    #[test]
    fn interrupt_stops_before_any_batch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let progress = dir.path().join("progress.json");
        let invoker = CannedInvoker::new(TRUE_FALSE_REPLY);
        let controller = controller();
        let models = vec!["stub".to_string()];
        let interrupted = AtomicBool::new(true);
        let mut store = SqliteStore::in_memory().expect("store");
        let mut checkpoint = ProgressCheckpoint::default();

        let summary = question_run(&invoker, &controller, &models, &progress, &interrupted)
            .execute(&mut store, &plan(), &mut checkpoint)
            .expect("run");

        assert!(summary.interrupted);
        assert_eq!(invoker.calls.get(), 0);
        assert!(!progress.exists());
    }
}
