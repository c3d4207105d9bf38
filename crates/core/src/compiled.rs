//! Immutable artifacts produced by the Blueprint Compiler. Nothing here
//! exposes a public mutator once constructed — these are lowered once and
//! referenced by every subsequent evaluation against a given flow version.

use crate::blueprint::{BehaviorType, CriticalAction, DetectionMode};
use crate::ids::{
    BehaviorId, BlueprintVersionId, CompiledFlowVersionId, CompiledRuleId, CompiledStepId,
    RubricCategoryId, StageId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedRole {
    Agent,
    Caller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    RequiredPhrase,
    ForbiddenPhrase,
    RequiredStep,
    SequenceRule,
    TimingRule,
    VerificationRule,
    ConditionalRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    Exact,
    Contains,
    Regex,
    Semantic,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimingConstraints {
    pub within_seconds: f64,
    pub reference: TimingReference,
    pub scope_stage: Option<StageId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingReference {
    CallStart,
    PreviousStep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledFlowVersion {
    pub id: CompiledFlowVersionId,
    pub company_id: String,
    pub blueprint_version_id: BlueprintVersionId,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub version_number: i32,
    pub language: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CompiledFlowVersion {
    /// `"{blueprint_name} (bp:{short_id} v{n})"`, the globally-disambiguated
    /// display name every flow version carries.
    pub fn display_name(blueprint_name: &str, blueprint_id_short: &str, version_number: i32) -> String {
        format!("{} (bp:{} v{})", blueprint_name, blueprint_id_short, version_number)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledFlowStage {
    pub id: StageId,
    pub flow_version_id: CompiledFlowVersionId,
    pub name: String,
    pub ordering_index: i32,
    pub stage_weight: Option<f64>,
    pub expected_duration_hint: Option<f64>,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledFlowStep {
    pub id: CompiledStepId,
    pub stage_id: StageId,
    pub source_behavior_id: BehaviorId,
    pub name: String,
    pub description: Option<String>,
    pub ordering_index: i32,
    pub expected_role: ExpectedRole,
    pub expected_phrases: Option<Vec<String>>,
    pub detection_hint: DetectionMode,
    pub behavior_type: BehaviorType,
    pub critical_action: Option<CriticalAction>,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledComplianceRule {
    pub id: CompiledRuleId,
    pub flow_version_id: CompiledFlowVersionId,
    pub flow_step_id: CompiledStepId,
    pub rule_type: RuleType,
    pub target: CompiledStepId,
    /// The blueprint behavior type this rule was compiled from
    /// (`required`/`critical`/`forbidden`); drives fallback-scoring
    /// penalty buckets downstream, distinct from `severity`.
    pub source_behavior_type: BehaviorType,
    pub phrases: Option<Vec<String>>,
    pub match_mode: Option<MatchMode>,
    pub severity: Severity,
    pub action_on_fail: Option<CriticalAction>,
    pub timing_constraints: Option<TimingConstraints>,
    pub active: bool,
    /// Rule-type-specific parameters not common to every rule type
    /// (`sequence_rule`'s before/after steps, `verification_rule`'s
    /// question count, `conditional_rule`'s condition and actions).
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricCategory {
    pub id: RubricCategoryId,
    pub name: String,
    pub weight: f64,
    pub pass_threshold: f64,
    pub level_definitions: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricMapping {
    pub category_id: RubricCategoryId,
    pub flow_step_id: CompiledStepId,
    pub contribution_weight: f64,
    pub required_flag: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledRubricTemplate {
    pub flow_version_id: CompiledFlowVersionId,
    pub name: String,
    pub categories: Vec<RubricCategory>,
    pub mappings: Vec<RubricMapping>,
}
