//! Exam Engine
//!
//! ## Current API
//!
//! - Seeded random selection (subsets with exclusion rules, knapsack)
//! - Question types and their registry
//! - Dynamically generated questions
//! - Grading scales
//! - Exam lifecycle: enrollment, generation, answering, evaluation
//! - Template versioning
//! - Validate template tests and generated exams
//!
pub mod dynamic;
pub mod error;
pub mod grading;
pub mod orchestrator;
pub mod question;
pub mod random;
pub mod templates;
pub mod validation;

pub use dynamic::{GeneratedQuestion, GeneratorLimits};
pub use error::{Error, Result};
pub use grading::Grading;
pub use orchestrator::{ExamResult, TestOrchestrator};
pub use question::{FormData, FormValue, Question, QuestionFactory, Renderer};
pub use random::Random;
