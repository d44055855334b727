use std::path::PathBuf;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::cli::DoctorArgs;
use crate::config::{DatabaseSettings, GpuPreference};
use crate::llm::configure_ollama_home;
use crate::process::command_version;

const TOOLS: [(&str, &[&str]); 4] = [
    ("ollama", &["--version"]),
    ("kubectl", &["version", "--client"]),
    ("psql", &["--version"]),
    ("nvidia-smi", &["--version"]),
];

#[derive(Debug, Clone, Serialize)]
pub struct ToolCheck {
    pub name: String,
    pub version: Option<String>,
}

impl ToolCheck {
    pub fn found(&self) -> bool {
        self.version.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub tools: Vec<ToolCheck>,
    pub gpu: GpuPreference,
    pub ollama_home: Option<PathBuf>,
    pub database_mode: String,
    pub problems: Vec<String>,
}

pub fn run(args: DoctorArgs) -> Result<()> {
    let tools = TOOLS
        .iter()
        .map(|(name, version_args)| ToolCheck {
            name: name.to_string(),
            version: command_version(name, version_args),
        })
        .collect::<Vec<_>>();
    let settings = DatabaseSettings::from_env()?;

    let report = diagnose(
        tools,
        GpuPreference::detect(),
        configure_ollama_home(args.ollama_home.as_deref()),
        &settings,
        &args,
    );

    for tool in &report.tools {
        match &tool.version {
            Some(version) => info!(tool = %tool.name, version = %version, "found"),
            None => warn!(tool = %tool.name, "not found on PATH"),
        }
    }
    info!(device = report.gpu.label(), source = ?report.gpu.source, "compute preference");
    match &report.ollama_home {
        Some(home) => info!(path = %home.display(), "ollama home"),
        None => info!("ollama home not configured, using ollama defaults"),
    }
    info!(
        mode = %report.database_mode,
        namespace = %settings.namespace,
        database = %settings.database,
        "database"
    );

    if !report.problems.is_empty() {
        for problem in &report.problems {
            error!("{problem}");
        }
        bail!("doctor found {} problem(s)", report.problems.len());
    }

    info!("environment looks ready");
    Ok(())
}

pub fn diagnose(
    tools: Vec<ToolCheck>,
    gpu: GpuPreference,
    ollama_home: Option<PathBuf>,
    settings: &DatabaseSettings,
    args: &DoctorArgs,
) -> DoctorReport {
    let mut problems = Vec::new();

    let ollama_found = tools
        .iter()
        .any(|tool| tool.name == "ollama" && tool.found());
    if !ollama_found && !args.skip_ollama {
        problems.push("ollama CLI not found; install it or pass --skip-ollama".to_string());
    }

    let database_mode = if settings.direct_requested {
        "direct"
    } else {
        "pod"
    };
    if args.require_db {
        if let Err(err) = settings.validate_direct() {
            problems.push(err.to_string());
        }
    }

    DoctorReport {
        tools,
        gpu,
        ollama_home,
        database_mode: database_mode.to_string(),
        problems,
    }
}
