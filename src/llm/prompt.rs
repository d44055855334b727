use crate::model::{GenerationTask, QuestionType};

/// Full prompt for the first attempt and the terse variant used on retries.
#[derive(Debug, Clone)]
pub struct PromptPair {
    pub full: String,
    pub strict: String,
}

impl PromptPair {
    pub fn for_attempt(&self, attempt: usize) -> &str {
        if attempt <= 1 { &self.full } else { &self.strict }
    }
}

pub const LESSON_PROMPT_BASE: &str = "You are a technical instructional designer. Generate multimodal lesson \
content for the lesson described below. Return ONLY a single valid JSON object with keys: \
written_steps (markdown string), audio_script (plain text), practice_activities (JSON array), \
visual_diagrams (JSON array). No surrounding text.";

fn question_data_format(question_type: QuestionType) -> &'static str {
    match question_type {
        QuestionType::MultipleChoice => r#"Format: {"options": ["A", "B", "C", "D"], "correct": 0}"#,
        QuestionType::TrueFalse => r#"Format: {"correct": true}"#,
        QuestionType::FillBlank => r#"Format: {"blanks": ["answer1", "answer2"]}"#,
    }
}

fn question_header(task: &GenerationTask, ase_standard: &str) -> String {
    format!(
        "Generate EXACTLY 1 {} question.\nCategory: {}\nDifficulty: {}\nASE Standard: {}\n\n{}\n",
        task.question_type.spoken(),
        task.category.display_name(),
        task.difficulty.as_str(),
        ase_standard,
        question_data_format(task.question_type),
    )
}

pub fn question_prompts(task: &GenerationTask, ase_standard: &str) -> PromptPair {
    PromptPair {
        full: question_prompt(task, ase_standard),
        strict: question_strict_prompt(task, ase_standard),
    }
}

pub fn question_prompt(task: &GenerationTask, ase_standard: &str) -> String {
    let schema = format!(
        r#"[{{"question_type": "{}", "question_text": "...", "difficulty": "{}", "topic": "...", "learning_objective": "...", "ase_standard": "{}", "question_data": {{...}}, "explanation": "..."}}]"#,
        task.question_type.as_str(),
        task.difficulty.as_str(),
        ase_standard,
    );

    format!(
        "{}\nRequirements:\n- Technically accurate\n- Clear and concise\n- Appropriate difficulty\n- Return ONLY JSON array: {}\n\nNO extra text. JSON only.",
        question_header(task, ase_standard),
        schema,
    )
}

pub fn question_strict_prompt(task: &GenerationTask, ase_standard: &str) -> String {
    format!(
        "OUTPUT ONLY VALID JSON. Do NOT include any commentary or markdown fences. \
Return a JSON array with exactly one object with keys: question_type, question_text, difficulty, \
topic, learning_objective, ase_standard, question_data, explanation.\n\n{}",
        question_header(task, ase_standard),
    )
}

#[derive(Debug, Clone)]
pub struct LessonPromptContext<'a> {
    pub course: &'a str,
    pub module: &'a str,
    pub title: &'a str,
    pub lesson_type: &'a str,
    pub duration_minutes: &'a str,
}

pub fn lesson_details(context: &LessonPromptContext<'_>) -> String {
    format!(
        "Lesson metadata:\n- course: {}\n- module: {}\n- lesson_title: {}\n- lesson_type: {}\n- duration_minutes: {}\n\n\
Requirements:\n- written_steps: 6-12 numbered markdown steps with safety and verification checklist.\n\
- audio_script: 90-180 second conversational instructor script.\n\
- practice_activities: array of 1-2 scenario objects with fields: type, title, description, questions.\n\
- visual_diagrams: array of 0-2 objects describing diagrams (type, description, labels).\n\n\
IMPORTANT: Output ONLY valid JSON.",
        context.course,
        context.module,
        context.title,
        context.lesson_type,
        context.duration_minutes,
    )
}

pub fn lesson_prompts(base: &str, context: &LessonPromptContext<'_>) -> PromptPair {
    let details = lesson_details(context);
    PromptPair {
        full: format!("{}\n\n{}", base.trim_end(), details),
        strict: format!(
            "OUTPUT ONLY VALID JSON. Do NOT include any commentary or markdown fences. \
Return a single JSON object with keys: written_steps,audio_script,practice_activities,visual_diagrams.\n\n{details}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{LESSON_PROMPT_BASE, LessonPromptContext, lesson_prompts, question_prompts};
    use crate::model::{Category, Difficulty, GenerationTask, QuestionType};

    fn task() -> GenerationTask {
        GenerationTask {
            category: Category::EnginePerformance,
            question_type: QuestionType::MultipleChoice,
            difficulty: Difficulty::Hard,
            count: 2,
        }
    }

    #[test]
    fn question_prompt_names_task_parameters_and_schema() {
        let prompts = question_prompts(&task(), "A8.B.1");

        assert!(prompts.full.contains("Generate EXACTLY 1 multiple choice question."));
        assert!(prompts.full.contains("Category: Engine Performance"));
        assert!(prompts.full.contains("ASE Standard: A8.B.1"));
        assert!(prompts.full.contains(r#""question_type": "multiple_choice""#));
        assert!(prompts.full.ends_with("NO extra text. JSON only."));
    }

    #[test]
    fn strict_prompt_is_used_after_first_attempt() {
        let prompts = question_prompts(&task(), "A8.B.1");

        assert_eq!(prompts.for_attempt(1), prompts.full);
        assert_eq!(prompts.for_attempt(2), prompts.strict);
        assert!(prompts.strict.starts_with("OUTPUT ONLY VALID JSON."));
        assert!(prompts.strict.contains("Difficulty: hard"));
    }

    #[test]
    fn lesson_prompt_embeds_metadata() {
        let context = LessonPromptContext {
            course: "diesel-101",
            module: "fuel-systems",
            title: "Injector Testing",
            lesson_type: "lab",
            duration_minutes: "45",
        };

        let prompts = lesson_prompts(LESSON_PROMPT_BASE, &context);
        assert!(prompts.full.starts_with("You are a technical instructional designer."));
        assert!(prompts.full.contains("- lesson_title: Injector Testing"));
        assert!(prompts.strict.contains("- duration_minutes: 45"));
        assert!(!prompts.strict.contains("instructional designer"));
    }
}
