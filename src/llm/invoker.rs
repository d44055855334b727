use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{info, warn};

use crate::process::{
    ProcessOutput, SIGNAL_EXIT_CODE, TIMEOUT_EXIT_CODE, command_available, run_with_timeout,
};

/// Return code, stdout and stderr of one model call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Invocation {
    /// Stderr only counts for calls that actually failed.
    pub fn is_timeout(&self) -> bool {
        self.code == TIMEOUT_EXIT_CODE
            || self.code == SIGNAL_EXIT_CODE
            || (!self.succeeded() && self.stderr.to_ascii_lowercase().contains("timeout"))
    }

    pub fn succeeded(&self) -> bool {
        self.code == 0
    }
}

impl From<ProcessOutput> for Invocation {
    fn from(output: ProcessOutput) -> Self {
        Self {
            code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

pub trait ModelInvoker {
    fn invoke(&self, model: &str, prompt: &str, timeout: Duration) -> Invocation;
}

/// Calls the local `ollama` CLI, one child process per prompt.
#[derive(Debug, Clone)]
pub struct OllamaCli {
    program: String,
    home: Option<PathBuf>,
    use_gpu: Option<bool>,
}

impl OllamaCli {
    pub fn new(home: Option<PathBuf>) -> Self {
        Self {
            program: "ollama".to_string(),
            home,
            use_gpu: None,
        }
    }

    /// Passes `OLLAMA_USE_GPU=1|0` to every child process.
    pub fn with_gpu_hint(mut self, use_gpu: bool) -> Self {
        self.use_gpu = Some(use_gpu);
        self
    }

    pub fn is_available(&self) -> bool {
        command_available(&self.program)
    }
}

impl ModelInvoker for OllamaCli {
    fn invoke(&self, model: &str, prompt: &str, timeout: Duration) -> Invocation {
        let mut command = Command::new(&self.program);
        command.arg("run").arg(model).arg("--nowordwrap");
        if let Some(home) = &self.home {
            command
                .env("OLLAMA_HOME", home)
                .env("OLLAMA_MODELS", home);
        }
        if let Some(use_gpu) = self.use_gpu {
            command.env("OLLAMA_USE_GPU", if use_gpu { "1" } else { "0" });
        }

        match run_with_timeout(&mut command, Some(prompt), timeout) {
            Ok(output) => output.into(),
            Err(err) => Invocation {
                code: -1,
                stdout: String::new(),
                stderr: format!("{err:#}"),
            },
        }
    }
}

/// Resolves the Ollama home directory: explicit path, then `OLLAMA_HOME`,
/// then the first local candidate that looks like an extracted Ollama home.
pub fn configure_ollama_home(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        info!(path = %path.display(), "using explicit Ollama models directory");
        return Some(path.to_path_buf());
    }

    if let Ok(value) = std::env::var("OLLAMA_HOME") {
        if !value.trim().is_empty() {
            info!(path = %value, "OLLAMA_HOME already set");
            return Some(PathBuf::from(value));
        }
    }

    for candidate in local_home_candidates() {
        if !candidate.exists() {
            continue;
        }
        if looks_like_ollama_home(&candidate) {
            info!(path = %candidate.display(), "using local Ollama home");
            return Some(candidate);
        }
        warn!(
            path = %candidate.display(),
            "candidate Ollama home lacks manifests/ or Modelfile"
        );
    }

    None
}

fn local_home_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("ollama models"));
        candidates.push(cwd.join("ollama_models"));
        candidates.push(cwd.join("model_archive"));
    }
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        candidates.push(PathBuf::from(home).join(".ollama"));
    }
    candidates
}

fn looks_like_ollama_home(path: &Path) -> bool {
    let manifests = path.join("manifests");
    let has_manifests = fs::read_dir(&manifests)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    has_manifests || path.join("Modelfile").is_file()
}
