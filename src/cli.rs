use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "autolearn",
    version,
    about = "Course page and LLM content tooling for the automotive LMS"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate course, module and lesson markdown stubs from CSV files.
    Pages(PagesArgs),
    /// Validate a generated course page tree.
    CheckPages(CheckPagesArgs),
    /// Generate assessment questions with a local model and store them.
    Questions(QuestionsArgs),
    /// Generate multimodal lesson content and SQL updates.
    Lessons(LessonsArgs),
    /// Show question generation progress from the checkpoint file.
    Status(StatusArgs),
    /// Check tools, GPU and database configuration.
    Doctor(DoctorArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PagesArgs {
    #[arg(long, default_value = "data/courses.csv")]
    pub courses: PathBuf,

    #[arg(long, default_value = "data/modules.csv")]
    pub modules: PathBuf,

    #[arg(long, default_value = "data/lessons.csv")]
    pub lessons: PathBuf,

    #[arg(long, default_value = "docs/course_pages")]
    pub out: PathBuf,

    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CheckPagesArgs {
    #[arg(default_value = "docs/course_pages")]
    pub path: PathBuf,

    /// Treat warnings as errors.
    #[arg(long, default_value_t = false)]
    pub strict: bool,

    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Require a module page for every module_slug in this CSV.
    #[arg(long)]
    pub modules_csv: Option<PathBuf>,

    /// Require a lesson page for every lesson_slug in this CSV.
    #[arg(long)]
    pub lessons_csv: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum StoreBackend {
    Auto,
    Postgres,
    Pod,
    Sqlite,
}

impl StoreBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Postgres => "postgres",
            Self::Pod => "pod",
            Self::Sqlite => "sqlite",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct QuestionsArgs {
    #[arg(
        long,
        env = "OLLAMA_MODEL",
        value_delimiter = ',',
        default_value = "lms-assistant:latest"
    )]
    pub models: Vec<String>,

    /// Base model timeout in seconds, before per-model multipliers.
    #[arg(long, default_value_t = 120)]
    pub timeout: u64,

    #[arg(long, default_value_t = 3)]
    pub max_attempts: usize,

    #[arg(long, env = "QGEN_QUESTIONS_PER_RUN", default_value_t = 1000)]
    pub questions_per_run: usize,

    #[arg(long, env = "QGEN_TOTAL_TARGET", default_value_t = 200_000)]
    pub total_target: u64,

    #[arg(long, default_value = ".cache/autolearn/question_progress.json")]
    pub progress_file: PathBuf,

    #[arg(long, value_enum, default_value_t = StoreBackend::Auto)]
    pub store: StoreBackend,

    /// Database file for the sqlite store.
    #[arg(long, default_value = ".cache/autolearn/questions.sqlite")]
    pub db_path: PathBuf,

    #[arg(long)]
    pub namespace: Option<String>,

    #[arg(long)]
    pub ollama_home: Option<PathBuf>,

    #[arg(long)]
    pub attempt_log_dir: Option<PathBuf>,

    /// Print the generation plan without calling models or the database.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LessonsArgs {
    #[arg(long, default_value = "data/lessons.csv")]
    pub lessons: PathBuf,

    #[arg(long, default_value = "data/multimodal")]
    pub out_dir: PathBuf,

    #[arg(
        long,
        value_delimiter = ',',
        default_value = "lms-assistant:latest,mistral:7b,llama3.1:latest,qwen3-vl:8b"
    )]
    pub models: Vec<String>,

    #[arg(long)]
    pub ollama_home: Option<PathBuf>,

    #[arg(long, default_value = "data/multimodal_updates.sql")]
    pub sql_out: PathBuf,

    #[arg(long, default_value = "data/multimodal_generation_summary.json")]
    pub summary_out: PathBuf,

    #[arg(long, default_value = "data/logs")]
    pub attempt_log_dir: PathBuf,

    #[arg(long, env = "MM_BASE_TIMEOUT", default_value_t = 120)]
    pub timeout: u64,

    #[arg(long, env = "MM_GPU_WARMUP_SECONDS", default_value_t = 0)]
    pub warmup_seconds: u64,

    /// Replaces the base lesson prompt with the contents of this file.
    #[arg(long, env = "MM_OVERRIDE_PROMPT_FILE")]
    pub prompt_file: Option<PathBuf>,

    /// Skip model calls and write placeholder content.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/autolearn/question_progress.json")]
    pub progress_file: PathBuf,

    #[arg(long, env = "QGEN_TOTAL_TARGET", default_value_t = 200_000)]
    pub total_target: u64,

    #[arg(long, env = "QGEN_QUESTIONS_PER_RUN", default_value_t = 1000)]
    pub questions_per_run: u64,
}

#[derive(Args, Debug, Clone)]
pub struct DoctorArgs {
    /// Fail unless direct database settings are complete.
    #[arg(long, default_value_t = false)]
    pub require_db: bool,

    #[arg(long, default_value_t = false)]
    pub skip_ollama: bool,

    #[arg(long)]
    pub ollama_home: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, ValueEnum};

    use super::{Cli, StoreBackend};

    #[test]
    fn every_subcommand_has_help_text() {
        let command = Cli::command();
        command.clone().debug_assert();
        for subcommand in command.get_subcommands() {
            assert!(
                subcommand.get_about().is_some(),
                "{} has no help text",
                subcommand.get_name()
            );
        }
    }

    #[test]
    fn backend_names_match_cli_values() {
        for backend in StoreBackend::value_variants() {
            let value = backend.to_possible_value().expect("possible value");
            assert_eq!(backend.as_str(), value.get_name());
        }
    }
}
