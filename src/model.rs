use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Ev,
    Diesel,
    EnginePerformance,
    Electrical,
    Brakes,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ev => "ev",
            Self::Diesel => "diesel",
            Self::EnginePerformance => "engine_performance",
            Self::Electrical => "electrical",
            Self::Brakes => "brakes",
        }
    }

    /// Human-readable form used in prompts, e.g. `Engine Performance`.
    pub fn display_name(self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    FillBlank,
}

impl QuestionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MultipleChoice => "multiple_choice",
            Self::TrueFalse => "true_false",
            Self::FillBlank => "fill_blank",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "multiple_choice" => Some(Self::MultipleChoice),
            "true_false" => Some(Self::TrueFalse),
            "fill_blank" | "fill_in_the_blank" => Some(Self::FillBlank),
            _ => None,
        }
    }

    pub fn spoken(self) -> String {
        self.as_str().replace('_', " ")
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "easy" => Some(Self::Easy),
            "medium" => Some(Self::Medium),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationTask {
    pub category: Category,
    pub question_type: QuestionType,
    pub difficulty: Difficulty,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QuestionData {
    MultipleChoice {
        #[serde(skip_serializing_if = "Vec::is_empty")]
        options: Vec<String>,
        correct: usize,
    },
    TrueFalse {
        correct: bool,
    },
    FillBlank {
        blanks: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Question {
    pub question_type: QuestionType,
    pub question_text: String,
    pub difficulty: Difficulty,
    pub topic: String,
    pub learning_objective: String,
    pub ase_standard: String,
    pub question_data: QuestionData,
    pub explanation: String,
    pub points: i32,
}

impl Question {
    pub fn question_data_json(&self) -> String {
        serde_json::to_string(&self.question_data).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionBank {
    pub name: String,
    pub description: String,
    pub category: String,
    pub difficulty: String,
}

impl QuestionBank {
    pub fn for_task(task: &GenerationTask) -> Self {
        let category = task.category.as_str();
        let difficulty = task.difficulty.as_str();
        Self {
            name: format!(
                "{} - {}",
                category.to_ascii_uppercase(),
                difficulty.to_ascii_uppercase()
            ),
            description: format!("Questions for {category} at {difficulty} level"),
            category: category.to_string(),
            difficulty: difficulty.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonContent {
    pub written_steps: String,
    pub audio_script: String,
    pub practice_activities: Value,
    pub visual_diagrams: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CourseRow {
    pub slug: String,
    pub code: String,
    pub title: String,
    pub course_id: String,
    pub summary: String,
    pub authors: String,
    pub tags: String,
    pub last_updated: String,
    pub published: String,
    pub estimated_time_minutes: String,
    pub credits: String,
    pub duration_hours: String,
    pub level: String,
    pub prerequisites: String,
    pub learning_objectives: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModuleRow {
    pub course_slug: String,
    pub module_slug: String,
    pub title: String,
    pub module_id: String,
    pub summary: String,
    pub sequence_number: String,
    pub duration_weeks: String,
    pub objectives: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LessonRow {
    pub course_slug: String,
    pub module_slug: String,
    pub lesson_slug: String,
    pub title: String,
    pub lesson_id: String,
    pub estimated_time_minutes: String,
    pub lesson_type: String,
    pub content: String,
}
