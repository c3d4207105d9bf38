//! Transcript normalization, PII redaction, and the per-recording
//! evaluation orchestrator (C1, C2, C11) that ties detection, rules,
//! LLM stage judgment, and scoring together into a completed `Evaluation`.

pub mod evaluation;
pub mod normalizer;
pub mod redactor;
pub mod store;
pub mod trace;

pub use evaluation::{CompiledFlowContext, CoreRunOutput, EvaluationPipeline, EvaluationRequest};
pub use normalizer::{AuditEntry, NormalizationMetadata, NormalizedTranscript, Normalizer};
pub use redactor::PiiRedactor;
pub use store::{EvaluationStore, InMemoryEvaluationStore};
pub use trace::{ProcessingTrace, TraceCheckpoint};
