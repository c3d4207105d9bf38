//! Hybrid exact/semantic behavior detection against a diarized transcript.

pub mod embedding;
pub mod engine;
pub mod matcher;

pub use embedding::{EmbeddingService, FallbackEmbedder};
pub use engine::{BehaviorResult, DetectionEngine, StageAggregate};
pub use matcher::{match_behavior, MatchOutcome};
