use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::util::{now_utc_string, write_json_pretty};

/// Cumulative generation progress shared across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredCheckpoint")]
pub struct ProgressCheckpoint {
    pub total_generated: u64,
    pub last_updated: Option<String>,
}

/// On-disk shape. Older files carry `total`, and upgraded ones keep it next to
/// `total_generated`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoredCheckpoint {
    total_generated: Option<u64>,
    total: Option<u64>,
    last_updated: Option<String>,
}

impl From<StoredCheckpoint> for ProgressCheckpoint {
    fn from(stored: StoredCheckpoint) -> Self {
        Self {
            total_generated: stored.total_generated.or(stored.total).unwrap_or(0),
            last_updated: stored.last_updated,
        }
    }
}

impl ProgressCheckpoint {
    /// A missing or unreadable file starts from zero instead of failing the run.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read progress file");
                return Self::default();
            }
        };

        match serde_json::from_str::<Self>(&text) {
            Ok(checkpoint) => checkpoint,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to parse progress file");
                Self::default()
            }
        }
    }

    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.last_updated = Some(now_utc_string());
        write_json_pretty(path, self)
    }

    /// Never moves the counter backwards.
    pub fn record(&mut self, total_generated: u64) {
        self.total_generated = self.total_generated.max(total_generated);
    }

    pub fn percent_of(&self, target: u64) -> f64 {
        if target == 0 {
            return 100.0;
        }
        self.total_generated as f64 / target as f64 * 100.0
    }

    pub fn runs_remaining(&self, target: u64, per_run: u64) -> u64 {
        let remaining = target.saturating_sub(self.total_generated);
        if per_run == 0 {
            return 0;
        }
        remaining.div_ceil(per_run)
    }
}
