//! Author-editable Blueprint: the mutable-until-published definition of how
//! a call should go and how it is scored.

use crate::ids::{BehaviorId, BlueprintId, BlueprintVersionId, CompiledFlowVersionId, StageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlueprintStatus {
    Draft,
    Published,
    Archived,
}

impl BlueprintStatus {
    /// Archive is reachable from either draft or published; there is no
    /// transition back out of archived.
    pub fn can_transition_to(self, next: BlueprintStatus) -> bool {
        use BlueprintStatus::*;
        matches!(
            (self, next),
            (Draft, Published) | (Draft, Archived) | (Published, Archived)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorType {
    Required,
    Optional,
    Forbidden,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    Semantic,
    ExactPhrase,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalAction {
    FailStage,
    FailOverall,
    FlagOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Behavior {
    pub id: BehaviorId,
    pub behavior_name: String,
    pub description: String,
    pub behavior_type: BehaviorType,
    pub detection_mode: DetectionMode,
    pub phrases: Option<Vec<String>>,
    pub weight: f64,
    pub critical_action: Option<CriticalAction>,
    pub ui_order: i32,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Behavior {
    pub fn new(behavior_name: impl Into<String>, behavior_type: BehaviorType, detection_mode: DetectionMode) -> Self {
        Self {
            id: BehaviorId::new(),
            behavior_name: behavior_name.into(),
            description: String::new(),
            behavior_type,
            detection_mode,
            phrases: None,
            weight: 0.0,
            critical_action: None,
            ui_order: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_phrases(mut self, phrases: Vec<String>) -> Self {
        self.phrases = Some(phrases);
        self
    }

    pub fn with_critical_action(mut self, action: CriticalAction) -> Self {
        self.critical_action = Some(action);
        self
    }

    /// Typed accessor for the `speaker` metadata key; defaults to `"agent"`
    /// per the mapper's contract.
    pub fn speaker_hint(&self) -> &str {
        self.metadata
            .get("speaker")
            .and_then(|v| v.as_str())
            .unwrap_or("agent")
    }

    pub fn timing_requirement(&self) -> Option<&serde_json::Value> {
        self.metadata.get("timing_requirement")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub stage_name: String,
    pub ordering_index: i32,
    pub stage_weight: Option<f64>,
    pub behaviors: Vec<Behavior>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Stage {
    pub fn new(stage_name: impl Into<String>, ordering_index: i32) -> Self {
        Self {
            id: StageId::new(),
            stage_name: stage_name.into(),
            ordering_index,
            stage_weight: None,
            behaviors: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    pub id: BlueprintId,
    pub company_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: BlueprintStatus,
    pub version_number: i32,
    pub compiled_flow_version_id: Option<CompiledFlowVersionId>,
    pub stages: Vec<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Blueprint {
    pub fn new(company_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: BlueprintId::new(),
            company_id: company_id.into(),
            name: name.into(),
            description: None,
            status: BlueprintStatus::Draft,
            version_number: 0,
            compiled_flow_version_id: None,
            stages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable snapshot created on publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintVersion {
    pub id: BlueprintVersionId,
    pub blueprint_id: BlueprintId,
    pub version_number: i32,
    pub snapshot: Blueprint,
    pub compiled_flow_version_id: Option<CompiledFlowVersionId>,
    pub publisher: String,
    pub published_at: DateTime<Utc>,
}
