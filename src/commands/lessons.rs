use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::read_csv_rows;
use crate::cli::LessonsArgs;
use crate::config::GpuPreference;
use crate::llm::prompt::{LESSON_PROMPT_BASE, LessonPromptContext, lesson_prompts};
use crate::llm::{FallbackController, ModelInvoker, OllamaCli, RetryPolicy, configure_ollama_home};
use crate::model::{LessonContent, LessonRow};
use crate::util::{ensure_directory, now_utc_string, write_json_pretty};

const DOLLAR_TAG: &str = "__MD__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    Ai,
    Placeholder,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonResult {
    pub course: String,
    pub module: String,
    pub lesson: String,
    pub lesson_id: String,
    pub status: ContentSource,
    pub model: Option<String>,
    pub logs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationSummary {
    pub generated_at: String,
    pub lesson_count: usize,
    pub lessons: Vec<LessonResult>,
}

/// Model access for one run. `invoker` is `None` when content should be
/// placeholders only.
pub struct LessonGenerator<'a> {
    pub invoker: Option<&'a dyn ModelInvoker>,
    pub controller: &'a FallbackController,
    pub models: &'a [String],
    pub base_timeout: Duration,
    pub base_prompt: &'a str,
}

pub struct LessonBatch {
    pub summary: GenerationSummary,
    /// Numeric lesson ids paired with the content written for them.
    pub updates: Vec<(i64, LessonContent)>,
}

pub fn run(args: LessonsArgs) -> Result<()> {
    let rows = read_csv_rows::<LessonRow>(&args.lessons)?;
    info!(path = %args.lessons.display(), lessons = rows.len(), "loaded lessons");

    let base_prompt = match &args.prompt_file {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read prompt override {}", path.display()))?;
            info!(path = %path.display(), "using prompt override");
            text
        }
        None => LESSON_PROMPT_BASE.to_string(),
    };

    let models = args
        .models
        .iter()
        .map(|model| model.trim().to_string())
        .filter(|model| !model.is_empty())
        .collect::<Vec<_>>();

    let home = configure_ollama_home(args.ollama_home.as_deref());
    let gpu = GpuPreference::detect();
    info!(device = gpu.label(), source = ?gpu.source, "compute preference");
    let invoker = OllamaCli::new(home).with_gpu_hint(gpu.gpu);

    let use_models = !args.dry_run && !models.is_empty() && invoker.is_available();
    if !use_models {
        warn!(
            dry_run = args.dry_run,
            "ollama not available or dry-run requested, writing placeholder content only"
        );
    }

    let policy = RetryPolicy {
        warmup: Duration::from_secs(args.warmup_seconds),
        ..RetryPolicy::default()
    };
    let controller = FallbackController::new(policy, Some(args.attempt_log_dir.clone()))?;
    let generator = LessonGenerator {
        invoker: use_models.then_some(&invoker as &dyn ModelInvoker),
        controller: &controller,
        models: &models,
        base_timeout: Duration::from_secs(args.timeout),
        base_prompt: &base_prompt,
    };

    let batch = generator.generate_all(&rows, &args.out_dir)?;

    if !batch.updates.is_empty() {
        let sql = build_update_sql(&batch.updates, &now_utc_string());
        if let Some(parent) = args.sql_out.parent() {
            ensure_directory(parent)?;
        }
        fs::write(&args.sql_out, sql)
            .with_context(|| format!("failed to write {}", args.sql_out.display()))?;
        info!(path = %args.sql_out.display(), statements = batch.updates.len(), "wrote SQL updates");
    }

    write_json_pretty(&args.summary_out, &batch.summary)?;

    let ai = batch
        .summary
        .lessons
        .iter()
        .filter(|lesson| lesson.status == ContentSource::Ai)
        .count();
    info!(
        path = %args.summary_out.display(),
        lessons = batch.summary.lesson_count,
        ai,
        placeholder = batch.summary.lesson_count - ai,
        "lesson generation summary"
    );

    Ok(())
}

impl LessonGenerator<'_> {
    pub fn generate_all(&self, rows: &[LessonRow], out_dir: &Path) -> Result<LessonBatch> {
        let mut lessons = Vec::with_capacity(rows.len());
        let mut updates = Vec::new();

        for row in rows {
            if row.lesson_slug.is_empty() {
                warn!(course = %row.course_slug, module = %row.module_slug, "skipping lesson row without lesson_slug");
                continue;
            }

            let (content, result) = self.generate_one(row);
            let path = out_dir
                .join(&row.course_slug)
                .join(&row.module_slug)
                .join(format!("{}.json", row.lesson_slug));
            write_json_pretty(&path, &content)?;

            match row.lesson_id.parse::<i64>() {
                Ok(id) => updates.push((id, content)),
                Err(_) if row.lesson_id.is_empty() => {}
                Err(_) => warn!(lesson = %row.lesson_slug, lesson_id = %row.lesson_id, "non-numeric lesson id, no SQL update"),
            }
            lessons.push(result);
        }

        Ok(LessonBatch {
            summary: GenerationSummary {
                generated_at: now_utc_string(),
                lesson_count: lessons.len(),
                lessons,
            },
            updates,
        })
    }

    fn generate_one(&self, row: &LessonRow) -> (LessonContent, LessonResult) {
        let mut result = LessonResult {
            course: row.course_slug.clone(),
            module: row.module_slug.clone(),
            lesson: row.lesson_slug.clone(),
            lesson_id: row.lesson_id.clone(),
            status: ContentSource::Placeholder,
            model: None,
            logs: Vec::new(),
        };

        let Some(invoker) = self.invoker else {
            return (placeholder_content(row), result);
        };

        let context = LessonPromptContext {
            course: &row.course_slug,
            module: &row.module_slug,
            title: lesson_title(row),
            lesson_type: non_empty_or(&row.lesson_type, "lesson"),
            duration_minutes: non_empty_or(&row.estimated_time_minutes, "0"),
        };
        let prompts = lesson_prompts(self.base_prompt, &context);
        let label = format!("{}_{}_{}", row.course_slug, row.module_slug, row.lesson_slug);

        let outcome = self.controller.run(
            invoker,
            self.models,
            self.base_timeout,
            &prompts,
            &label,
            |items| items.into_iter().next().and_then(|item| coerce_lesson_content(&item)),
        );
        result.logs = outcome.log_paths();
        result.model = outcome.model;

        match outcome.value {
            Some(content) => {
                result.status = ContentSource::Ai;
                (content, result)
            }
            None => {
                warn!(lesson = %row.lesson_slug, "all models failed, using placeholder");
                (placeholder_content(row), result)
            }
        }
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

fn lesson_title(row: &LessonRow) -> &str {
    non_empty_or(&row.title, &row.lesson_slug)
}

pub fn placeholder_content(row: &LessonRow) -> LessonContent {
    LessonContent {
        written_steps: "1. Review safety precautions.\n2. Gather required tools.\n\
3. Perform visual inspection.\n4. Run diagnostic tests.\n5. Execute service steps.\n\
6. Verify operation and document results.\n\n**Verification checklist**\n\
- Safety equipment used\n- Measurements within spec\n"
            .to_string(),
        audio_script: format!(
            "This is a short instructor script for {}. Follow safety procedures, then walk \
through the steps and conclude with verification.",
            lesson_title(row)
        ),
        practice_activities: json!([{
            "type": "scenario",
            "title": "Basic diagnostic",
            "description": "Use the provided data to identify the issue.",
            "questions": [{
                "question": "What is the first step?",
                "options": ["Inspect", "Replace"],
                "correct": 0
            }]
        }]),
        visual_diagrams: json!([]),
    }
}

/// Shapes one model object into lesson content. Lists of steps are joined
/// line by line; any other non-string value is kept as its JSON text.
pub fn coerce_lesson_content(value: &Value) -> Option<LessonContent> {
    let object = value.as_object().filter(|object| !object.is_empty())?;

    let written_steps = match object.get("written_steps") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items.iter().map(display_text).collect::<Vec<_>>().join("\n"),
        Some(other) => other.to_string(),
    };
    let audio_script = match object.get("audio_script") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    };

    Some(LessonContent {
        written_steps,
        audio_script,
        practice_activities: object
            .get("practice_activities")
            .cloned()
            .unwrap_or_else(|| json!([])),
        visual_diagrams: object
            .get("visual_diagrams")
            .cloned()
            .unwrap_or_else(|| json!([])),
    })
}

fn display_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Wraps `text` in `$tag$...$tag$`, growing the tag until the body cannot
/// close it early. Line endings are normalised to `\n`.
pub fn dollar_quote(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut tag = DOLLAR_TAG.to_string();
    while text.contains(&tag) {
        tag.push('X');
    }
    format!("${tag}${text}${tag}$")
}

pub fn update_statement(lesson_id: i64, content: &LessonContent) -> String {
    format!(
        "UPDATE module_lessons SET written_steps = {}, audio_script = {}, \
practice_activities = {}::jsonb, visual_diagrams = {}::jsonb WHERE id = {lesson_id};\n",
        dollar_quote(&content.written_steps),
        dollar_quote(&content.audio_script),
        dollar_quote(&content.practice_activities.to_string()),
        dollar_quote(&content.visual_diagrams.to_string()),
    )
}

pub fn build_update_sql(updates: &[(i64, LessonContent)], generated_at: &str) -> String {
    let mut sql = String::new();
    let _ = writeln!(sql, "-- Generated on {generated_at}");
    for (lesson_id, content) in updates {
        sql.push_str(&update_statement(*lesson_id, content));
    }
    sql
}
