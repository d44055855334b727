use std::env;
use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::process::{command_available, run_with_timeout};
use crate::util::env_flag;

pub const DEFAULT_NAMESPACE: &str = "autolearnpro";
pub const DEFAULT_PG_USER: &str = "postgres";
pub const DEFAULT_PG_DATABASE: &str = "lms_api_prod";
const DEFAULT_PG_PORT: u16 = 5432;
const DEFAULT_POOL_MAX: u32 = 10;

/// Database connection settings gathered from `PG*` variables.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseSettings {
    pub direct_requested: bool,
    #[serde(skip_serializing)]
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub database: String,
    pub pool_max: u32,
    pub namespace: String,
}

impl DatabaseSettings {
    pub fn from_env() -> Result<Self> {
        let url = non_empty_var("DATABASE_URL");
        let host = non_empty_var("PGHOST");

        let port = match non_empty_var("PGPORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("PGPORT is not a valid port: {value}"))?,
            None => DEFAULT_PG_PORT,
        };
        let pool_max = match non_empty_var("PG_POOL_MAX") {
            Some(value) => value
                .parse::<u32>()
                .with_context(|| format!("PG_POOL_MAX is not a number: {value}"))?,
            None => DEFAULT_POOL_MAX,
        };

        let password = match non_empty_var("PGPASSWORD") {
            Some(password) => Some(password),
            None => match non_empty_var("PGPASSWORD_FILE") {
                Some(path) => Some(
                    fs::read_to_string(&path)
                        .with_context(|| format!("failed to read PGPASSWORD_FILE: {path}"))?
                        .trim()
                        .to_string(),
                ),
                None => None,
            },
        };

        Ok(Self {
            direct_requested: env_flag("DIRECT_DB") || host.is_some() || url.is_some(),
            url,
            host,
            port,
            user: non_empty_var("PGUSER").unwrap_or_else(|| DEFAULT_PG_USER.to_string()),
            password,
            database: non_empty_var("PGDATABASE")
                .unwrap_or_else(|| DEFAULT_PG_DATABASE.to_string()),
            pool_max: pool_max.max(1),
            namespace: non_empty_var("KUBE_NAMESPACE")
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
        })
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        if let Some(namespace) = namespace {
            self.namespace = namespace;
        }
        self
    }

    /// Direct mode needs somewhere to connect and a credential.
    pub fn validate_direct(&self) -> Result<()> {
        if self.url.is_some() {
            return Ok(());
        }
        if self.host.is_none() {
            bail!("direct database mode requested but PGHOST is not set; set PGHOST or unset DIRECT_DB");
        }
        if self.password.is_none() {
            bail!("direct database mode requires PGPASSWORD (or PGPASSWORD_FILE)");
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuSource {
    ForceCpu,
    ForceGpu,
    NvidiaSmi,
    OllamaPs,
    NotDetected,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct GpuPreference {
    pub gpu: bool,
    pub source: GpuSource,
}

impl GpuPreference {
    pub fn detect() -> Self {
        if env_flag("FORCE_CPU") {
            return Self::new(false, GpuSource::ForceCpu);
        }
        if env_flag("FORCE_GPU") {
            return Self::new(true, GpuSource::ForceGpu);
        }
        if command_available("nvidia-smi") {
            return Self::new(true, GpuSource::NvidiaSmi);
        }
        if ollama_reports_gpu() {
            return Self::new(true, GpuSource::OllamaPs);
        }
        Self::new(false, GpuSource::NotDetected)
    }

    fn new(gpu: bool, source: GpuSource) -> Self {
        Self { gpu, source }
    }

    pub fn label(self) -> &'static str {
        if self.gpu { "gpu" } else { "cpu" }
    }
}

fn ollama_reports_gpu() -> bool {
    let mut command = std::process::Command::new("ollama");
    command.arg("ps");
    run_with_timeout(&mut command, None, Duration::from_secs(5))
        .map(|output| output.success() && output.stdout.contains("GPU"))
        .unwrap_or(false)
}

pub fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
