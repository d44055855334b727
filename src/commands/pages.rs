use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use super::read_csv_rows;
use crate::cli::PagesArgs;
use crate::model::{CourseRow, LessonRow, ModuleRow};
use crate::util::write_if_missing;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PagesSummary {
    pub courses: usize,
    pub pages_written: usize,
    pub pages_skipped: usize,
}

impl PagesSummary {
    fn record(&mut self, written: bool) {
        if written {
            self.pages_written += 1;
        } else {
            self.pages_skipped += 1;
        }
    }
}

pub fn run(args: PagesArgs) -> Result<()> {
    let summary = generate_pages(&args)?;
    info!(
        out = %args.out.display(),
        courses = summary.courses,
        written = summary.pages_written,
        skipped = summary.pages_skipped,
        "course page generation complete"
    );
    Ok(())
}

pub fn generate_pages(args: &PagesArgs) -> Result<PagesSummary> {
    let courses = load_rows::<CourseRow>(&args.courses)?;
    let modules = load_rows::<ModuleRow>(&args.modules)?;
    let lessons = load_rows::<LessonRow>(&args.lessons)?;

    let mut modules_by_course: HashMap<&str, Vec<&ModuleRow>> = HashMap::new();
    for module in &modules {
        modules_by_course
            .entry(module.course_slug.as_str())
            .or_default()
            .push(module);
    }

    // Lessons keep CSV order within each (course, module) group.
    let mut lessons_by_module: HashMap<(&str, &str), Vec<&LessonRow>> = HashMap::new();
    let mut lesson_groups: Vec<(&str, &str)> = Vec::new();
    for lesson in &lessons {
        let key = (lesson.course_slug.as_str(), lesson.module_slug.as_str());
        let group = lessons_by_module.entry(key).or_default();
        if group.is_empty() {
            lesson_groups.push(key);
        }
        group.push(lesson);
    }

    let mut summary = PagesSummary::default();
    for course in &courses {
        let slug = course.slug.as_str();
        if slug.is_empty() {
            warn!(title = %course.title, "skipping course with no slug");
            continue;
        }
        summary.courses += 1;
        let course_dir = args.out.join(slug);

        let mut module_rows = modules_by_course.get(slug).cloned().unwrap_or_default();
        module_rows.sort_by_key(|module| leading_number(&module.sequence_number));

        let index = render_course(course, &module_rows);
        summary.record(write_if_missing(&course_dir.join("index.md"), &index, args.force)?);

        for module in &module_rows {
            let module_slug = module.module_slug.as_str();
            if module_slug.is_empty() {
                warn!(course = slug, title = %module.title, "skipping module with no slug");
                continue;
            }

            let mut lesson_rows = lessons_by_module
                .get(&(slug, module_slug))
                .cloned()
                .unwrap_or_default();
            lesson_rows.sort_by_key(|lesson| leading_number(&lesson.lesson_id));

            let page = render_module(module, &lesson_rows);
            let path = course_dir.join("modules").join(format!("{module_slug}.md"));
            summary.record(write_if_missing(&path, &page, args.force)?);
        }

        for key in lesson_groups.iter().filter(|(course_slug, _)| *course_slug == slug) {
            for lesson in &lessons_by_module[key] {
                let lesson_slug = lesson.lesson_slug.as_str();
                if lesson_slug.is_empty() {
                    warn!(course = slug, title = %lesson.title, "skipping lesson with no slug");
                    continue;
                }

                let page = render_lesson(lesson);
                let path = course_dir.join("lessons").join(format!("{lesson_slug}.md"));
                summary.record(write_if_missing(&path, &page, args.force)?);
            }
        }
    }

    Ok(summary)
}

fn load_rows<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        warn!(path = %path.display(), "csv file not found, treating as empty");
        return Ok(Vec::new());
    }
    read_csv_rows(path)
}

fn leading_number(value: &str) -> i64 {
    value.trim().parse::<i64>().unwrap_or(0)
}

fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

/// Double-quoted YAML scalar.
fn yaml_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for character in value.chars() {
        match character {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => {}
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

/// Numbers pass through bare, anything else is quoted, empty becomes 0.
fn yaml_number(value: &str) -> String {
    if value.is_empty() {
        "0".to_string()
    } else if value.parse::<f64>().is_ok() {
        value.to_string()
    } else {
        yaml_string(value)
    }
}

fn yaml_bool(value: &str) -> String {
    match value.to_ascii_lowercase().as_str() {
        "" => "false".to_string(),
        "true" | "false" => value.to_ascii_lowercase(),
        "yes" | "1" => "true".to_string(),
        "no" | "0" => "false".to_string(),
        _ => yaml_string(value),
    }
}

/// Splits on `;` when present, otherwise on `,`, and renders an inline list.
fn yaml_list(value: &str) -> String {
    let separator = if value.contains(';') { ';' } else { ',' };
    let items = value
        .split(separator)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(yaml_string)
        .collect::<Vec<_>>();
    format!("[{}]", items.join(", "))
}

fn render_course(course: &CourseRow, modules: &[&ModuleRow]) -> String {
    let title = or_default(&course.title, &course.slug);

    let mut modules_list = String::new();
    for module in modules {
        let module_slug = module.module_slug.as_str();
        if module_slug.is_empty() {
            continue;
        }
        let _ = writeln!(
            modules_list,
            "- [{}](modules/{module_slug}.md)",
            or_default(&module.title, module_slug)
        );
    }

    format!(
        "---\n\
title: {title}\n\
slug: {slug}\n\
code: {code}\n\
course_id: {course_id}\n\
summary: {summary}\n\
authors: {authors}\n\
last_updated: {last_updated}\n\
tags: {tags}\n\
published: {published}\n\
estimated_time_minutes: {minutes}\n\
credits: {credits}\n\
duration_hours: {hours}\n\
level: {level}\n\
prerequisites: {prerequisites}\n\
learning_objectives: {objectives}\n\
---\n\
\n\
# {heading}\n\
\n\
{summary_text}\n\
\n\
## Modules\n\
\n\
{modules_list}",
        title = yaml_string(title),
        slug = yaml_string(&course.slug),
        code = yaml_string(&course.code),
        course_id = yaml_number(&course.course_id),
        summary = yaml_string(&course.summary),
        authors = yaml_list(&course.authors),
        last_updated = yaml_string(&course.last_updated),
        tags = yaml_list(&course.tags),
        published = yaml_bool(&course.published),
        minutes = yaml_number(&course.estimated_time_minutes),
        credits = yaml_number(&course.credits),
        hours = yaml_number(&course.duration_hours),
        level = yaml_string(&course.level),
        prerequisites = yaml_list(&course.prerequisites),
        objectives = yaml_list(&course.learning_objectives),
        heading = title,
        summary_text = course.summary,
    )
}

fn render_module(module: &ModuleRow, lessons: &[&LessonRow]) -> String {
    let title = or_default(&module.title, &module.module_slug);

    let mut lessons_list = String::new();
    for lesson in lessons {
        let lesson_slug = lesson.lesson_slug.as_str();
        if lesson_slug.is_empty() {
            continue;
        }
        let _ = writeln!(
            lessons_list,
            "- [{}](../lessons/{lesson_slug}.md)",
            or_default(&lesson.title, lesson_slug)
        );
    }

    format!(
        "---\n\
title: {title}\n\
slug: {slug}\n\
module_id: {module_id}\n\
summary: {summary}\n\
sequence_number: {sequence}\n\
duration_weeks: {weeks}\n\
objectives: {objectives}\n\
---\n\
\n\
# {heading}\n\
\n\
### Lessons\n\
\n\
{lessons_list}",
        title = yaml_string(title),
        slug = yaml_string(&module.module_slug),
        module_id = yaml_number(&module.module_id),
        summary = yaml_string(&module.summary),
        sequence = yaml_number(&module.sequence_number),
        weeks = yaml_number(&module.duration_weeks),
        objectives = yaml_list(&module.objectives),
        heading = title,
    )
}

fn render_lesson(lesson: &LessonRow) -> String {
    let title = or_default(&lesson.title, &lesson.lesson_slug);

    format!(
        "---\n\
title: {title}\n\
slug: {slug}\n\
lesson_id: {lesson_id}\n\
estimated_time_minutes: {minutes}\n\
lesson_type: {lesson_type}\n\
---\n\
\n\
# {heading}\n\
\n\
{content}\n",
        title = yaml_string(title),
        slug = yaml_string(&lesson.lesson_slug),
        lesson_id = yaml_number(&lesson.lesson_id),
        minutes = yaml_number(&lesson.estimated_time_minutes),
        lesson_type = yaml_string(or_default(&lesson.lesson_type, "lesson")),
        heading = title,
        content = or_default(&lesson.content, "Content goes here."),
    )
}
