use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use super::read_csv_rows;
use crate::cli::CheckPagesArgs;
use crate::util::{now_utc_string, write_json_pretty};

const REQUIRED_KEYS: [&str; 2] = ["title", "slug"];
const COURSE_RECOMMENDED_KEYS: [&str; 4] = ["code", "credits", "duration_hours", "level"];
const MODULE_RECOMMENDED_KEYS: [&str; 2] = ["module_id", "sequence_number"];
const LESSON_RECOMMENDED_KEYS: [&str; 2] = ["lesson_id", "lesson_type"];

struct PagePatterns {
    frontmatter: Regex,
    image: Regex,
    link: Regex,
    slug: Regex,
}

impl PagePatterns {
    fn new() -> Result<Self> {
        Ok(Self {
            frontmatter: Regex::new(r"(?s)\A---[ \t]*\r?\n(.*?)\r?\n---[ \t]*\r?\n")
                .context("failed to compile frontmatter regex")?,
            image: Regex::new(r"!\[[^\]]*\]\(([^)]+)\)").context("failed to compile image regex")?,
            link: Regex::new(r"\[[^\]]+\]\(([^)]+)\)").context("failed to compile link regex")?,
            slug: Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").context("failed to compile slug regex")?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileFindings {
    pub path: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageValidationReport {
    pub generated_at: String,
    pub root: String,
    pub strict: bool,
    pub status: String,
    pub files_checked: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub files: Vec<FileFindings>,
    /// Findings that belong to the tree rather than a single file.
    pub issues: Vec<String>,
}

impl PageValidationReport {
    pub fn passed(&self) -> bool {
        self.error_count == 0 && !(self.strict && self.warning_count > 0)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SlugRow {
    module_slug: String,
    lesson_slug: String,
}

pub fn run(args: CheckPagesArgs) -> Result<()> {
    let report = validate_tree(&args)?;

    for file in &report.files {
        for warning in &file.warnings {
            warn!(file = %file.path, "{warning}");
        }
        for message in &file.errors {
            error!(file = %file.path, "{message}");
        }
    }
    for issue in &report.issues {
        error!("{issue}");
    }

    if let Some(report_path) = &args.report {
        write_json_pretty(report_path, &report)?;
        info!(path = %report_path.display(), "wrote validation report");
    }

    info!(
        root = %report.root,
        files_checked = report.files_checked,
        errors = report.error_count,
        warnings = report.warning_count,
        strict = report.strict,
        status = %report.status,
        "course page validation summary"
    );

    if !report.passed() {
        if report.strict && report.warning_count > 0 {
            bail!(
                "course page validation failed: {} errors, {} warnings (strict mode treats warnings as errors)",
                report.error_count,
                report.warning_count
            );
        }
        bail!("course page validation failed: {} errors", report.error_count);
    }

    Ok(())
}

pub fn validate_tree(args: &CheckPagesArgs) -> Result<PageValidationReport> {
    let root = args.path.as_path();
    if !root.is_dir() {
        bail!("course page path not found: {}", root.display());
    }

    let patterns = PagePatterns::new()?;
    let markdown_files = collect_markdown_files(root)?;
    if markdown_files.is_empty() {
        bail!("no markdown files found under {}", root.display());
    }

    let mut issues = Vec::new();
    let has_index = markdown_files
        .iter()
        .any(|path| path.file_name().is_some_and(|name| name == "index.md"));
    if !has_index {
        issues.push(format!("no index.md found under {}", root.display()));
    }
    for course_dir in course_directories(root)? {
        if !course_dir.join("index.md").is_file() {
            issues.push(format!(
                "course directory {} has no index.md",
                display_relative(root, &course_dir)
            ));
        }
    }

    let mut files = Vec::with_capacity(markdown_files.len());
    let mut seen_slugs: HashMap<String, String> = HashMap::new();
    for path in &markdown_files {
        let mut findings = validate_file(path, root, &patterns)?;
        if let Some(slug) = &findings.slug {
            match seen_slugs.get(slug) {
                Some(first) => findings
                    .errors
                    .push(format!("duplicate slug '{slug}' also used by {first}")),
                None => {
                    seen_slugs.insert(slug.clone(), findings.path.clone());
                }
            }
        }
        files.push(findings);
    }

    if let Some(modules_csv) = &args.modules_csv {
        let rows = read_csv_rows::<SlugRow>(modules_csv)?;
        let expected = rows.iter().map(|row| row.module_slug.as_str());
        issues.extend(missing_pages(root, "modules", expected));
    }
    if let Some(lessons_csv) = &args.lessons_csv {
        let rows = read_csv_rows::<SlugRow>(lessons_csv)?;
        let expected = rows.iter().map(|row| row.lesson_slug.as_str());
        issues.extend(missing_pages(root, "lessons", expected));
    }

    let error_count =
        files.iter().map(|file| file.errors.len()).sum::<usize>() + issues.len();
    let warning_count = files.iter().map(|file| file.warnings.len()).sum::<usize>();

    let mut report = PageValidationReport {
        generated_at: now_utc_string(),
        root: root.display().to_string(),
        strict: args.strict,
        status: String::new(),
        files_checked: files.len(),
        error_count,
        warning_count,
        files,
        issues,
    };
    report.status = if report.passed() { "passed" } else { "failed" }.to_string();
    Ok(report)
}

fn collect_markdown_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        let is_markdown = entry
            .path()
            .extension()
            .is_some_and(|extension| extension == "md");
        if entry.file_type().is_file() && is_markdown {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn course_directories(root: &Path) -> Result<Vec<PathBuf>> {
    let mut directories = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("failed to read {}", root.display()))? {
        let entry = entry.with_context(|| format!("failed to read {}", root.display()))?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if path.is_dir() && !hidden {
            directories.push(path);
        }
    }
    directories.sort();
    Ok(directories)
}

/// Every slug listed in the CSV needs a page in at least one course.
fn missing_pages<'a>(
    root: &Path,
    section: &str,
    expected: impl Iterator<Item = &'a str>,
) -> Vec<String> {
    let wanted = expected
        .filter(|slug| !slug.is_empty())
        .collect::<BTreeSet<_>>();
    let courses = course_directories(root).unwrap_or_default();

    wanted
        .into_iter()
        .filter(|slug| {
            !courses
                .iter()
                .any(|course| course.join(section).join(format!("{slug}.md")).is_file())
        })
        .map(|slug| format!("missing {section} page for '{slug}'"))
        .collect()
}

fn validate_file(path: &Path, root: &Path, patterns: &PagePatterns) -> Result<FileFindings> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut findings = FileFindings {
        path: relative.display().to_string(),
        ..FileFindings::default()
    };

    let Some(captures) = patterns.frontmatter.captures(&text) else {
        findings
            .errors
            .push("missing YAML frontmatter (--- ... ---) at top of file".to_string());
        return Ok(findings);
    };
    let raw_frontmatter = captures.get(1).map(|group| group.as_str()).unwrap_or_default();

    let frontmatter = match serde_yaml::from_str::<YamlValue>(raw_frontmatter) {
        Ok(YamlValue::Mapping(mapping)) => mapping,
        Ok(YamlValue::Null) => serde_yaml::Mapping::new(),
        Ok(_) => {
            findings
                .errors
                .push("frontmatter is not a key/value mapping".to_string());
            return Ok(findings);
        }
        Err(err) => {
            findings.errors.push(format!("invalid YAML frontmatter: {err}"));
            return Ok(findings);
        }
    };
    let has_key = |key: &str| frontmatter.contains_key(YamlValue::String(key.to_string()));

    for key in REQUIRED_KEYS {
        if !has_key(key) {
            findings
                .errors
                .push(format!("missing required frontmatter key '{key}'"));
        }
    }

    if let Some(slug) = frontmatter
        .get(YamlValue::String("slug".to_string()))
        .and_then(yaml_scalar_text)
        .filter(|slug| !slug.is_empty())
    {
        if !patterns.slug.is_match(&slug) {
            findings.warnings.push(format!(
                "slug '{slug}' is not kebab-case (lowercase letters, digits, hyphens)"
            ));
        }
        findings.slug = Some(slug);
    }

    let parts = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>();
    let mut recommended: Vec<(&str, &[&str])> = Vec::new();
    if parts.len() >= 2 && parts.last() == Some(&"index.md") {
        recommended.push(("course", &COURSE_RECOMMENDED_KEYS));
    }
    if parts.contains(&"modules") {
        recommended.push(("module", &MODULE_RECOMMENDED_KEYS));
    }
    if parts.contains(&"lessons") {
        recommended.push(("lesson", &LESSON_RECOMMENDED_KEYS));
    }
    for (kind, keys) in recommended {
        for key in keys {
            if !has_key(key) {
                findings
                    .warnings
                    .push(format!("{kind} frontmatter missing recommended key '{key}'"));
            }
        }
    }

    let directory = path.parent().unwrap_or(root);
    for captures in patterns.image.captures_iter(&text) {
        let target = local_target(&captures[1]);
        if is_remote(target) {
            continue;
        }
        if !directory.join(target).exists() {
            findings.errors.push(format!("image not found: {target}"));
        }
    }
    for captures in patterns.link.captures_iter(&text) {
        let target = local_target(&captures[1]);
        if is_remote(target) || !target.ends_with(".md") {
            continue;
        }
        if !directory.join(target).exists() {
            findings
                .errors
                .push(format!("linked markdown target not found: {target}"));
        }
    }

    Ok(findings)
}

fn yaml_scalar_text(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(text) => Some(text.clone()),
        YamlValue::Number(number) => Some(number.to_string()),
        YamlValue::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Drops any `#fragment` or `?query` suffix.
fn local_target(raw: &str) -> &str {
    let raw = raw.trim();
    let end = raw.find(['#', '?']).unwrap_or(raw.len());
    &raw[..end]
}

fn is_remote(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::validate_tree;
    use crate::cli::CheckPagesArgs;

    const INDEX: &str = "---\ntitle: \"Brakes\"\nslug: \"brakes-101\"\ncode: \"BRK101\"\ncredits: 3\nduration_hours: 40\nlevel: \"intro\"\n---\n\n# Brakes\n\n- [Hydraulics](modules/hydraulics.md)\n";
    const MODULE: &str = "---\ntitle: \"Hydraulics\"\nslug: \"hydraulics\"\nmodule_id: 1\nsequence_number: 1\n---\n\n# Hydraulics\n";

    fn args(path: &Path, strict: bool) -> CheckPagesArgs {
        CheckPagesArgs {
            path: path.to_path_buf(),
            strict,
            report: None,
            modules_csv: None,
            lessons_csv: None,
        }
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write");
    }

    #[test]
    fn clean_tree_passes_strict() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(&dir.path().join("brakes-101").join("index.md"), INDEX);
        write(&dir.path().join("brakes-101").join("modules").join("hydraulics.md"), MODULE);

        let report = validate_tree(&args(dir.path(), true)).expect("report");
        assert_eq!(report.files_checked, 2);
        assert!(report.passed(), "{report:?}");
        assert_eq!(report.status, "passed");
    }

    #[test]
    fn course_without_index_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(&dir.path().join("brakes-101").join("modules").join("hydraulics.md"), MODULE);

        let report = validate_tree(&args(dir.path(), false)).expect("report");
        assert!(!report.passed());
        assert!(report.issues.iter().any(|issue| issue.contains("has no index.md")));
    }

    #[test]
    fn flat_tree_without_index_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            &dir.path().join("lesson.md"),
            "---\ntitle: \"Bleeding\"\nslug: \"bleeding\"\n---\n\n# Bleeding\n",
        );

        let report = validate_tree(&args(dir.path(), false)).expect("report");
        assert!(!report.passed());
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].starts_with("no index.md found under"));
    }

    #[test]
    fn broken_links_missing_keys_and_duplicate_slugs_are_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let course = dir.path().join("brakes-101");
        write(&course.join("index.md"), &INDEX.replace("hydraulics.md", "abs.md"));
        write(&course.join("modules").join("hydraulics.md"), MODULE);
        write(&course.join("modules").join("copy.md"), MODULE);
        write(&course.join("lessons").join("bare.md"), "no frontmatter here\n");
        write(
            &course.join("lessons").join("pic.md"),
            "---\ntitle: Pic\nlesson_id: 3\nlesson_type: lab\n---\n![rotor](img/rotor.png) [ext](https://example.com/a.md)\n",
        );

        let report = validate_tree(&args(dir.path(), false)).expect("report");
        let all_errors = report
            .files
            .iter()
            .flat_map(|file| file.errors.iter().map(|error| error.as_str()))
            .collect::<Vec<_>>();

        assert!(all_errors.iter().any(|error| error.contains("linked markdown target not found: modules/abs.md")));
        assert!(all_errors.iter().any(|error| error.contains("duplicate slug 'hydraulics'")));
        assert!(all_errors.iter().any(|error| error.contains("missing YAML frontmatter")));
        assert!(all_errors.iter().any(|error| error.contains("missing required frontmatter key 'slug'")));
        assert!(all_errors.iter().any(|error| error.contains("image not found: img/rotor.png")));
        assert!(!all_errors.iter().any(|error| error.contains("example.com")));
        assert!(!report.passed());
    }

    #[test]
    fn warnings_only_fail_in_strict_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            &dir.path().join("Brakes_101").join("index.md"),
            "---\ntitle: Brakes\nslug: Brakes_101\n---\n",
        );

        let relaxed = validate_tree(&args(dir.path(), false)).expect("report");
        assert!(relaxed.passed());
        assert!(relaxed.warning_count >= 5);

        let strict = validate_tree(&args(dir.path(), true)).expect("report");
        assert!(!strict.passed());
    }

    #[test]
    fn csv_cross_check_reports_missing_pages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pages = dir.path().join("pages");
        write(&pages.join("brakes-101").join("index.md"), INDEX.replace("- [Hydraulics](modules/hydraulics.md)\n", "").as_str());
        let csv = dir.path().join("modules.csv");
        fs::write(&csv, "course_slug,module_slug\nbrakes-101,hydraulics\n").expect("csv");

        let mut check = args(&pages, false);
        check.modules_csv = Some(csv);
        let report = validate_tree(&check).expect("report");
        assert_eq!(report.issues, vec!["missing modules page for 'hydraulics'".to_string()]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(validate_tree(&args(&dir.path().join("absent"), false)).is_err());
    }
}
