use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::info;

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `20250301T142233Z`, safe inside file names.
pub fn utc_compact_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create json file: {}", path.display()))?;
    file.write_all(&data)
        .with_context(|| format!("failed to write json file: {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("failed to finalize json file: {}", path.display()))?;

    Ok(())
}

/// Writes `content` unless the file already exists and `force` is off.
/// Returns whether the file was written.
pub fn write_if_missing(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        info!(path = %path.display(), "skipping existing file");
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "written");

    Ok(true)
}

/// Replaces anything outside `[A-Za-z0-9._-]` so the value can be used in a file name.
pub fn safe_file_component(value: &str) -> String {
    value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '.' | '_' | '-') {
                character
            } else {
                '_'
            }
        })
        .collect()
}

pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((byte_index, _)) => value[..byte_index].to_string(),
        None => value.to_string(),
    }
}

pub fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{safe_file_component, truncate_chars, utc_compact_string, write_if_missing};

    #[test]
    fn compact_timestamp_has_no_separators() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 14, 22, 33).single().expect("timestamp");
        assert_eq!(utc_compact_string(ts), "20250301T142233Z");
    }

    #[test]
    fn safe_file_component_replaces_separators() {
        assert_eq!(safe_file_component("qwen3-vl:8b"), "qwen3-vl_8b");
        assert_eq!(safe_file_component("a/b c"), "a_b_c");
    }

    #[test]
    fn truncate_chars_respects_multibyte_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn write_if_missing_keeps_existing_file_without_force() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("page.md");

        assert!(write_if_missing(&path, "first", false).expect("first write"));
        assert!(!write_if_missing(&path, "second", false).expect("second write"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "first");

        assert!(write_if_missing(&path, "third", true).expect("forced write"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "third");
    }
}
