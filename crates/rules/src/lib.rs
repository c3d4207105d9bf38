//! Pure, I/O-free evaluation of compiled compliance rules against a
//! transcript and the detection engine's output.

pub mod engine;

pub use engine::{DetectedStep, RuleEngine, RuleOutcome};
