//! Rubric category and overall scoring (C10): combines per-stage scores
//! with deterministic rule results through the compiled rubric template.

pub mod scorer;

pub use scorer::{CategoryScore, ConfidenceBreakdown, RubricScorer, RuleFailure, ScoringInput, ScoringResult, StageInput};
