pub mod normalize;
pub mod plan;

pub use normalize::normalize_question;
pub use plan::{ase_standard_for, calculate_batches};
