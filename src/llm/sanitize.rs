use anyhow::{Context, Result};
use regex::{Captures, Regex};
use serde_json::Value;
use tracing::{error, warn};

use crate::util::truncate_chars;

const RAW_RESPONSE_LOG_CHARS: usize = 2000;

/// Best-effort salvage of JSON from free-form model output.
///
/// Delimiter matching is a plain depth counter, not a parser: brackets inside
/// string literals are counted too. Whatever parses is returned; schema checks
/// happen afterwards in the normalizer.
pub struct ResponseSanitizer {
    control_chars: Regex,
    trailing_commas: Regex,
    labelled_options_hint: Regex,
    options_region: Regex,
    option_items: Regex,
}

impl ResponseSanitizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            control_chars: Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f]")
                .context("failed to compile control character regex")?,
            trailing_commas: Regex::new(r",\s*([}\]])")
                .context("failed to compile trailing comma regex")?,
            labelled_options_hint: Regex::new(r#"(?i)\[\s*"?A"?\s*\]\s*[^\[\{\}\]]+\[\s*"?B"?"#)
                .context("failed to compile labelled option regex")?,
            options_region: Regex::new(r#"(?s)"options"\s*:\s*\[.*?\](.*?)(,\s*"correct"\s*:|\})"#)
                .context("failed to compile options region regex")?,
            option_items: Regex::new(r#"\[\s*"?([A-Za-z0-9])"?\s*\]\s*([^\[\]\{\},]+)"#)
                .context("failed to compile option item regex")?,
        })
    }

    /// Returns the parsed JSON as a list (a lone object becomes a one-element
    /// list), or `None` when nothing could be salvaged.
    pub fn parse(&self, raw: &str) -> Option<Vec<Value>> {
        let response = raw.trim();
        let Some(candidate) = extract_json_candidate(response) else {
            warn!("no JSON found in response");
            return None;
        };

        let first_error = match serde_json::from_str::<Value>(candidate) {
            Ok(value) => return Some(promote_to_list(value)),
            Err(err) => err,
        };

        let cleaned = self.clean(candidate);
        if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
            warn!("parsed JSON after sanitization");
            return Some(promote_to_list(value));
        }

        let repaired = self.repair_labelled_options(&cleaned);
        match serde_json::from_str::<Value>(&repaired) {
            Ok(value) => {
                warn!("parsed JSON after option repair");
                Some(promote_to_list(value))
            }
            Err(final_error) => {
                error!(
                    first_error = %first_error,
                    final_error = %final_error,
                    "JSON parse failed after sanitization"
                );
                error!(
                    raw = %truncate_chars(raw, RAW_RESPONSE_LOG_CHARS),
                    "raw model response (truncated)"
                );
                None
            }
        }
    }

    fn clean(&self, candidate: &str) -> String {
        let cleaned = self.control_chars.replace_all(candidate, "");
        let cleaned = self.trailing_commas.replace_all(&cleaned, "$1").into_owned();
        if cleaned.contains('\'') && !cleaned.contains('"') {
            cleaned.replace('\'', "\"")
        } else {
            cleaned
        }
    }

    /// Rewrites `"options": ["A"] first, ["B"] second, ...` into a proper
    /// string array. Only the first options block is touched.
    fn repair_labelled_options(&self, text: &str) -> String {
        if !self.labelled_options_hint.is_match(text) {
            return text.to_string();
        }
        let Some(region) = self.options_region.find(text) else {
            return text.to_string();
        };

        let options = self
            .option_items
            .captures_iter(region.as_str())
            .filter_map(|captures| captures.get(2))
            .map(|item| {
                item.as_str()
                    .trim()
                    .trim_end_matches(',')
                    .trim()
                    .trim_matches('"')
                    .replace('\\', "\\\\")
                    .replace('"', "\\\"")
            })
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>();
        if options.is_empty() {
            return text.to_string();
        }

        let rendered = format!(
            "\"options\": [{}]",
            options
                .iter()
                .map(|option| format!("\"{option}\""))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let repaired = self
            .options_region
            .replacen(text, 1, |captures: &Captures| {
                format!(
                    "{rendered}{}",
                    captures.get(2).map(|tail| tail.as_str()).unwrap_or_default()
                )
            })
            .into_owned();
        self.trailing_commas.replace_all(&repaired, "$1").into_owned()
    }
}

/// First span from `open` to its matching `close`, counted by depth.
pub fn extract_balanced(text: &str, open: char, close: char) -> Option<&str> {
    let mut start = None;
    let mut depth = 0_usize;

    for (index, character) in text.char_indices() {
        if character == open {
            if start.is_none() {
                start = Some(index);
            }
            depth += 1;
        } else if character == close {
            if let Some(begin) = start {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[begin..index + close.len_utf8()]);
                }
            }
        }
    }

    None
}

fn extract_json_candidate(text: &str) -> Option<&str> {
    let mut delimiters = [('[', ']'), ('{', '}')]
        .into_iter()
        .filter_map(|(open, close)| text.find(open).map(|position| (position, open, close)))
        .collect::<Vec<_>>();
    delimiters.sort_by_key(|(position, _, _)| *position);

    delimiters
        .into_iter()
        .find_map(|(_, open, close)| extract_balanced(text, open, close))
}

fn promote_to_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}
