use crate::model::{Category, Difficulty, GenerationTask, QuestionType};

pub const CATEGORY_WEIGHTS: [(Category, f64); 5] = [
    (Category::Ev, 0.25),
    (Category::Diesel, 0.20),
    (Category::EnginePerformance, 0.20),
    (Category::Electrical, 0.20),
    (Category::Brakes, 0.15),
];

pub const QUESTION_TYPE_WEIGHTS: [(QuestionType, f64); 3] = [
    (QuestionType::MultipleChoice, 0.40),
    (QuestionType::TrueFalse, 0.35),
    (QuestionType::FillBlank, 0.25),
];

pub const DIFFICULTY_WEIGHTS: [(Difficulty, f64); 3] = [
    (Difficulty::Easy, 0.30),
    (Difficulty::Medium, 0.50),
    (Difficulty::Hard, 0.20),
];

pub fn ase_standards(category: Category) -> &'static [&'static str] {
    match category {
        Category::Ev => &["L3.A.1", "L3.A.2", "L3.A.3", "L3.B.1", "L3.B.2", "L3.C.1"],
        Category::Diesel => &["T2.A.1", "T2.A.2", "T2.B.1", "T2.C.1", "T2.D.1", "T2.E.1"],
        Category::EnginePerformance => &["A8.A.1", "A8.A.2", "A8.B.1", "A8.C.1", "A8.D.1", "A8.E.1"],
        Category::Brakes => &["A5.A.1", "A5.A.2", "A5.B.1", "A5.C.1", "A5.D.1", "A5.E.1"],
        Category::Electrical => &["A6.A.1", "A6.A.2", "A6.B.1", "A6.C.1", "A6.D.1", "A6.E.1"],
    }
}

/// Round-robin over the category's ASE standards.
pub fn ase_standard_for(category: Category, index: usize) -> &'static str {
    let standards = ase_standards(category);
    standards[index % standards.len()]
}

/// One task per category/type/difficulty combination, in table order. Every
/// combination gets at least one question; ties round to even.
pub fn calculate_batches(questions_per_run: usize) -> Vec<GenerationTask> {
    let total = questions_per_run as f64;
    let mut batches =
        Vec::with_capacity(CATEGORY_WEIGHTS.len() * QUESTION_TYPE_WEIGHTS.len() * DIFFICULTY_WEIGHTS.len());

    for (category, category_weight) in CATEGORY_WEIGHTS {
        for (question_type, type_weight) in QUESTION_TYPE_WEIGHTS {
            for (difficulty, difficulty_weight) in DIFFICULTY_WEIGHTS {
                let share = total * category_weight * type_weight * difficulty_weight;
                batches.push(GenerationTask {
                    category,
                    question_type,
                    difficulty,
                    count: (share.round_ties_even() as usize).max(1),
                });
            }
        }
    }

    batches
}
