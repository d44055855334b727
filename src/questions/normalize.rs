use anyhow::{Result, anyhow, bail};
use serde_json::{Map, Value};

use crate::model::{Difficulty, GenerationTask, Question, QuestionData, QuestionType};
use crate::util::truncate_chars;

const MAX_TEXT_CHARS: usize = 5000;
const MAX_TOPIC_CHARS: usize = 200;
const MAX_OBJECTIVE_CHARS: usize = 500;
const DEFAULT_MC_OPTION_SLOTS: usize = 4;

/// Turns one sanitized model item into a canonical `Question`.
///
/// Missing difficulty, points and ASE standard come from the task. Shorthand
/// answer fields are folded into `question_data` before per-type validation.
pub fn normalize_question(
    value: &Value,
    task: &GenerationTask,
    ase_standard: &str,
) -> Result<Question> {
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("question is not a JSON object"))?;

    let question_text = string_field(object, "question_text")
        .ok_or_else(|| anyhow!("question_text is missing or empty"))?;

    let question_type = object
        .get("question_type")
        .and_then(Value::as_str)
        .and_then(QuestionType::parse)
        .unwrap_or(task.question_type);
    let difficulty = object
        .get("difficulty")
        .and_then(Value::as_str)
        .and_then(Difficulty::parse)
        .unwrap_or(task.difficulty);
    let points = object
        .get("points")
        .and_then(Value::as_i64)
        .filter(|points| *points >= 1)
        .and_then(|points| i32::try_from(points).ok())
        .unwrap_or(1);

    let question_data = match question_type {
        QuestionType::MultipleChoice => multiple_choice_data(object)?,
        QuestionType::TrueFalse => true_false_data(object)?,
        QuestionType::FillBlank => fill_blank_data(object)?,
    };

    Ok(Question {
        question_type,
        question_text: truncate_chars(&question_text, MAX_TEXT_CHARS),
        difficulty,
        topic: truncate_chars(
            &string_field(object, "topic").unwrap_or_else(|| "General".to_string()),
            MAX_TOPIC_CHARS,
        ),
        learning_objective: truncate_chars(
            &string_field(object, "learning_objective").unwrap_or_default(),
            MAX_OBJECTIVE_CHARS,
        ),
        ase_standard: string_field(object, "ase_standard")
            .unwrap_or_else(|| ase_standard.to_string()),
        question_data,
        explanation: truncate_chars(
            &string_field(object, "explanation").unwrap_or_default(),
            MAX_TEXT_CHARS,
        ),
        points,
    })
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Looks in `question_data` first, then at the top level.
fn answer_field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    let nested = object.get("question_data").and_then(Value::as_object);
    keys.iter().find_map(|key| {
        nested
            .and_then(|data| data.get(*key))
            .or_else(|| object.get(*key))
            .filter(|value| !value.is_null())
    })
}

fn multiple_choice_data(object: &Map<String, Value>) -> Result<QuestionData> {
    let options = match answer_field(object, &["options"]) {
        Some(Value::Array(items)) => items
            .iter()
            .map(value_to_text)
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>(),
        Some(other) => bail!("multiple_choice options must be a list, got {other}"),
        None => Vec::new(),
    };

    let correct = answer_field(object, &["correct", "correct_answer"])
        .ok_or_else(|| anyhow!("multiple_choice question has no correct index"))?;
    let correct = option_index(correct)
        .ok_or_else(|| anyhow!("multiple_choice correct index is not usable: {correct}"))?;

    let slots = if options.is_empty() {
        DEFAULT_MC_OPTION_SLOTS
    } else {
        options.len()
    };
    if correct >= slots {
        bail!("multiple_choice correct index {correct} is out of range for {slots} options");
    }

    Ok(QuestionData::MultipleChoice { options, correct })
}

/// Accepts `2`, `"2"` or a letter label such as `"C"`.
fn option_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|index| usize::try_from(index).ok()),
        Value::String(text) => {
            let text = text.trim();
            if let Ok(index) = text.parse::<usize>() {
                return Some(index);
            }
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(letter), None) if letter.is_ascii_alphabetic() => {
                    Some((letter.to_ascii_uppercase() as u8 - b'A') as usize)
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn true_false_data(object: &Map<String, Value>) -> Result<QuestionData> {
    let correct = answer_field(object, &["correct", "correct_answer"])
        .ok_or_else(|| anyhow!("true_false question has no correct answer"))?;

    let correct = match correct {
        Value::Bool(flag) => *flag,
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" => true,
            "false" | "f" | "no" => false,
            _ => bail!("true_false answer is not a boolean: {text}"),
        },
        other => bail!("true_false answer is not a boolean: {other}"),
    };

    Ok(QuestionData::TrueFalse { correct })
}

fn fill_blank_data(object: &Map<String, Value>) -> Result<QuestionData> {
    let blanks = match answer_field(object, &["blanks", "correct_answers"]) {
        Some(Value::Array(items)) => items
            .iter()
            .map(value_to_text)
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>(),
        Some(Value::String(text)) if !text.trim().is_empty() => vec![text.trim().to_string()],
        _ => Vec::new(),
    };

    if blanks.is_empty() {
        bail!("fill_blank question has no blanks");
    }

    Ok(QuestionData::FillBlank { blanks })
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::normalize_question;
    use crate::model::{Category, Difficulty, GenerationTask, QuestionData, QuestionType};

    fn task(question_type: QuestionType) -> GenerationTask {
        GenerationTask {
            category: Category::Electrical,
            question_type,
            difficulty: Difficulty::Medium,
            count: 1,
        }
    }

    #[test]
    fn multiple_choice_with_defaults_from_task() {
        let value = json!({
            "question_text": "Which meter setting measures voltage drop?",
            "question_data": {"options": ["DC volts", "Ohms", "Amps", "Hz"], "correct": 0},
        });

        let question = normalize_question(&value, &task(QuestionType::MultipleChoice), "A6.A.1")
            .expect("valid question");

        assert_eq!(question.question_type, QuestionType::MultipleChoice);
        assert_eq!(question.difficulty, Difficulty::Medium);
        assert_eq!(question.ase_standard, "A6.A.1");
        assert_eq!(question.topic, "General");
        assert_eq!(question.points, 1);
        assert_eq!(
            question.question_data,
            QuestionData::MultipleChoice {
                options: vec![
                    "DC volts".to_string(),
                    "Ohms".to_string(),
                    "Amps".to_string(),
                    "Hz".to_string()
                ],
                correct: 0
            }
        );
    }

    #[test]
    fn top_level_shorthand_is_folded_into_question_data() {
        let value = json!({
            "question_type": "multiple_choice",
            "question_text": "Pick one",
            "options": ["a", "b", "c"],
            "correct": "B",
        });

        let question = normalize_question(&value, &task(QuestionType::MultipleChoice), "A6.B.1")
            .expect("valid question");
        assert_eq!(question.question_data_json(), r#"{"options":["a","b","c"],"correct":1}"#);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let value = json!({
            "question_text": "Pick one",
            "question_data": {"options": ["a", "b"], "correct": 2},
        });
        let err = normalize_question(&value, &task(QuestionType::MultipleChoice), "A6.B.1")
            .expect_err("index outside options");
        assert!(err.to_string().contains("out of range"));

        let no_options = json!({"question_text": "Pick one", "correct": 3});
        normalize_question(&no_options, &task(QuestionType::MultipleChoice), "A6.B.1")
            .expect("0..=3 allowed without options");
    }

    #[test]
    fn true_false_accepts_correct_answer_strings() {
        let value = json!({
            "question_type": "true_false",
            "question_text": "A blown fuse has infinite resistance.",
            "correct_answer": "True",
        });

        let question = normalize_question(&value, &task(QuestionType::TrueFalse), "A6.C.1")
            .expect("valid question");
        assert_eq!(question.question_data, QuestionData::TrueFalse { correct: true });

        let bad = json!({"question_text": "x", "question_data": {"correct": 1}});
        assert!(normalize_question(&bad, &task(QuestionType::TrueFalse), "A6.C.1").is_err());
    }

    #[test]
    fn fill_blank_accepts_correct_answers_alias() {
        let value = json!({
            "question_text": "Ohm's law: V = I x ___",
            "question_data": {"correct_answers": ["R", ""]},
        });

        let question = normalize_question(&value, &task(QuestionType::FillBlank), "A6.D.1")
            .expect("valid question");
        assert_eq!(
            question.question_data,
            QuestionData::FillBlank {
                blanks: vec!["R".to_string()]
            }
        );

        let empty = json!({"question_text": "x", "blanks": []});
        assert!(normalize_question(&empty, &task(QuestionType::FillBlank), "A6.D.1").is_err());
    }

    #[test]
    fn missing_text_and_non_objects_are_rejected() {
        let task = task(QuestionType::TrueFalse);
        assert!(normalize_question(&json!({"correct": true}), &task, "A6.A.1").is_err());
        assert!(normalize_question(&json!("just text"), &task, "A6.A.1").is_err());
    }

    #[test]
    fn long_fields_are_truncated() {
        let value = json!({
            "question_text": "q".repeat(6000),
            "topic": "t".repeat(300),
            "learning_objective": "o".repeat(600),
            "correct": false,
        });

        let question = normalize_question(&value, &task(QuestionType::TrueFalse), "A6.A.1")
            .expect("valid question");
        assert_eq!(question.question_text.chars().count(), 5000);
        assert_eq!(question.topic.chars().count(), 200);
        assert_eq!(question.learning_objective.chars().count(), 500);
    }
}
