use crate::ids::{BlueprintId, SandboxRunId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxResult {
    pub overall_score: f64,
    pub overall_passed: bool,
    pub requires_human_review: bool,
    pub confidence_score: f64,
    pub deterministic_results: serde_json::Value,
    pub llm_stage_evaluations: serde_json::Value,
    pub final_evaluation: serde_json::Value,
    /// Cost/usage estimate surfaced to the author so they can gauge the
    /// price of running this Blueprint against real calls.
    pub usage_estimate: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxRun {
    pub id: SandboxRunId,
    pub blueprint_id: BlueprintId,
    pub idempotency_key: Option<String>,
    pub status: SandboxStatus,
    pub result: Option<SandboxResult>,
    pub error: Option<String>,
}

impl SandboxRun {
    pub fn queued(blueprint_id: BlueprintId, idempotency_key: Option<String>) -> Self {
        Self {
            id: SandboxRunId::new(),
            blueprint_id,
            idempotency_key,
            status: SandboxStatus::Queued,
            result: None,
            error: None,
        }
    }
}
