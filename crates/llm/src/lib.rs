//! LLM stage evaluator: backend abstraction, deterministic prompting,
//! structured-output schema validation, and the deterministic fallback
//! that keeps the LLM off the critical correctness path.

pub mod backend;
pub mod evaluator;
pub mod prompt;
pub mod schema;

pub use backend::{GenerationParams, HttpEmbeddingConfig, HttpEmbeddingProvider, HttpLlmBackend, HttpLlmConfig, LlmBackend, MockBackend};
pub use evaluator::{RuleSignal, StageEvaluation, StageEvaluator, StepEvaluation};
