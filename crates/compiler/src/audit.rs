//! Append-only record of compile attempts, kept in-memory alongside the
//! compile result so authors can see why a publish succeeded or failed
//! without a dedicated persistence layer.

use chrono::{DateTime, Utc};
use qa_core::BlueprintVersionId;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileOutcome {
    Succeeded,
    Failed,
    ReusedExisting,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompileAuditEntry {
    pub blueprint_version_id: BlueprintVersionId,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: CompileOutcome,
    pub warning_count: usize,
    pub error_count: usize,
}
