use crate::ids::{BlueprintId, CompiledFlowVersionId, EvaluationId, RecordingId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Pending,
    Completed,
    Failed,
}

impl EvaluationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EvaluationStatus::Completed | EvaluationStatus::Failed)
    }
}

/// Detection + rule engine outcomes, opaque beyond their JSON shape to the
/// persistence layer — owning crates (`qa-detection`, `qa-rules`) define the
/// concrete nested types and serialize into this envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeterministicResults {
    pub behaviors: serde_json::Value,
    pub rule_outcomes: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmStageEvaluations {
    pub stages: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalEvaluation {
    pub category_scores: serde_json::Value,
    pub violations: serde_json::Value,
    pub stage_summaries: serde_json::Value,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: EvaluationId,
    pub recording_id: RecordingId,
    pub blueprint_id: BlueprintId,
    pub compiled_flow_version_id: CompiledFlowVersionId,
    pub status: EvaluationStatus,
    pub overall_score: f64,
    pub overall_passed: bool,
    pub requires_human_review: bool,
    pub confidence_score: f64,
    pub deterministic_results: Option<DeterministicResults>,
    pub llm_stage_evaluations: Option<LlmStageEvaluations>,
    pub final_evaluation: Option<FinalEvaluation>,
    pub error: Option<String>,
}

impl Evaluation {
    pub fn pending(recording_id: RecordingId, blueprint_id: BlueprintId, compiled_flow_version_id: CompiledFlowVersionId) -> Self {
        Self {
            id: EvaluationId::new(),
            recording_id,
            blueprint_id,
            compiled_flow_version_id,
            status: EvaluationStatus::Pending,
            overall_score: 0.0,
            overall_passed: false,
            requires_human_review: false,
            confidence_score: 0.0,
            deterministic_results: None,
            llm_stage_evaluations: None,
            final_evaluation: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(EvaluationStatus::Completed.is_terminal());
        assert!(EvaluationStatus::Failed.is_terminal());
        assert!(!EvaluationStatus::Pending.is_terminal());
    }
}
