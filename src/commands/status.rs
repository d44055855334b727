use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::checkpoint::ProgressCheckpoint;
use crate::cli::StatusArgs;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressStatus {
    pub total_generated: u64,
    pub total_target: u64,
    pub percent: f64,
    pub remaining: u64,
    pub runs_remaining: u64,
    pub last_updated: Option<String>,
}

pub fn run(args: StatusArgs) -> Result<()> {
    if !args.progress_file.exists() {
        warn!(path = %args.progress_file.display(), "progress file missing, reporting from zero");
    }

    let checkpoint = ProgressCheckpoint::load(&args.progress_file);
    let status = progress_status(&checkpoint, args.total_target, args.questions_per_run);

    info!(
        path = %args.progress_file.display(),
        total_generated = status.total_generated,
        total_target = status.total_target,
        percent = %format!("{:.2}", status.percent),
        remaining = status.remaining,
        runs_remaining = status.runs_remaining,
        last_updated = %status.last_updated.as_deref().unwrap_or("never"),
        "question generation progress"
    );

    Ok(())
}

pub fn progress_status(
    checkpoint: &ProgressCheckpoint,
    total_target: u64,
    questions_per_run: u64,
) -> ProgressStatus {
    ProgressStatus {
        total_generated: checkpoint.total_generated,
        total_target,
        percent: checkpoint.percent_of(total_target),
        remaining: total_target.saturating_sub(checkpoint.total_generated),
        runs_remaining: checkpoint.runs_remaining(total_target, questions_per_run),
        last_updated: checkpoint.last_updated.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::progress_status;
    use crate::checkpoint::ProgressCheckpoint;

    #[test]
    fn reports_remaining_runs_for_partial_progress() {
        let checkpoint = ProgressCheckpoint {
            total_generated: 1500,
            last_updated: Some("2026-10-01T00:00:00Z".to_string()),
        };

        let status = progress_status(&checkpoint, 200_000, 1000);
        assert_eq!(status.remaining, 198_500);
        assert_eq!(status.runs_remaining, 199);
        assert!((status.percent - 0.75).abs() < 1e-9);
    }

    #[test]
    fn overshoot_reports_zero_remaining() {
        let checkpoint = ProgressCheckpoint {
            total_generated: 250,
            last_updated: None,
        };

        let status = progress_status(&checkpoint, 200, 100);
        assert_eq!(status.remaining, 0);
        assert_eq!(status.runs_remaining, 0);
    }
}
