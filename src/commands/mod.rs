pub mod check_pages;
pub mod doctor;
pub mod lessons;
pub mod pages;
pub mod questions;
pub mod status;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

/// Reads a headed CSV file into rows. A leading UTF-8 BOM is dropped, fields
/// are trimmed and columns the row type does not know are ignored.
pub(crate) fn read_csv_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for (index, record) in reader.deserialize::<T>().enumerate() {
        let row = record
            .with_context(|| format!("failed to parse row {} of {}", index + 2, path.display()))?;
        rows.push(row);
    }
    Ok(rows)
}
