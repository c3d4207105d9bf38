//! Shared data model, traits, and error taxonomy for the QA evaluation engine.

pub mod blueprint;
pub mod compiled;
pub mod error;
pub mod evaluation;
pub mod ids;
pub mod sandbox;
pub mod traits;
pub mod transcript;

pub use blueprint::{Behavior, BehaviorType, Blueprint, BlueprintStatus, BlueprintVersion, CriticalAction, DetectionMode, Stage};
pub use compiled::{
    CompiledComplianceRule, CompiledFlowStage, CompiledFlowStep, CompiledFlowVersion,
    CompiledRubricTemplate, MatchMode, RubricCategory, RubricMapping, RuleType, Severity,
    TimingConstraints,
};
pub use error::{Error, Result};
pub use evaluation::{
    DeterministicResults, Evaluation, EvaluationStatus, FinalEvaluation, LlmStageEvaluations,
    RecordingStatus,
};
pub use ids::{
    BehaviorId, BlueprintId, BlueprintVersionId, CompiledFlowVersionId, CompiledRuleId,
    CompiledStepId, EvaluationId, RecordingId, RubricCategoryId, SandboxRunId, StageId,
};
pub use sandbox::{SandboxResult, SandboxRun, SandboxStatus};
pub use transcript::{DiarizedSegment, SentimentSample, Speaker, Transcript};
