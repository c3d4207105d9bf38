//! Orchestrates validate -> map -> atomic persistence of compiled
//! artifacts. There is no real database in this system, so "atomic
//! persistence" is a typestate guard over an in-memory transaction: either
//! every artifact list lands in the committed store, or none does.

use crate::audit::{CompileAuditEntry, CompileOutcome};
use crate::mapper::{map_blueprint_to_artifacts, CompiledArtifacts};
use crate::validator::validate_blueprint;
use dashmap::DashMap;
use parking_lot::Mutex;
use qa_core::{Blueprint, BlueprintVersionId, CompiledFlowVersionId};
use tracing::{info, warn};

pub struct CompileResult {
    pub success: bool,
    pub compiled_flow_version_id: Option<CompiledFlowVersionId>,
    pub errors: Vec<crate::validator::ValidationError>,
    pub warnings: Vec<crate::validator::ValidationWarning>,
}

/// A single accumulated transaction's pending writes; committed as one unit
/// by `BlueprintCompiler::compile` once validation and mapping succeed.
struct CompileTransaction {
    artifacts: CompiledArtifacts,
}

pub struct BlueprintCompiler {
    links: DashMap<BlueprintVersionId, CompiledFlowVersionId>,
    store: DashMap<CompiledFlowVersionId, CompiledArtifacts>,
    audit_log: Mutex<Vec<CompileAuditEntry>>,
}

impl Default for BlueprintCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl BlueprintCompiler {
    pub fn new() -> Self {
        Self {
            links: DashMap::new(),
            store: DashMap::new(),
            audit_log: Mutex::new(Vec::new()),
        }
    }

    pub fn compiled_artifacts(&self, flow_version_id: CompiledFlowVersionId) -> Option<dashmap::mapref::one::Ref<'_, CompiledFlowVersionId, CompiledArtifacts>> {
        self.store.get(&flow_version_id)
    }

    pub fn audit_log(&self) -> Vec<CompileAuditEntry> {
        self.audit_log.lock().clone()
    }

    /// Idempotent in the same `BlueprintVersionId`: re-compiling returns the
    /// existing link rather than producing a new flow version.
    pub fn compile(
        &self,
        blueprint: &Blueprint,
        blueprint_version_id: BlueprintVersionId,
        company_id: &str,
        force_normalize_weights: bool,
        actor: &str,
    ) -> CompileResult {
        if let Some(existing) = self.links.get(&blueprint_version_id) {
            info!(blueprint_version_id = %blueprint_version_id, flow_version_id = %*existing, "compile is idempotent, reusing existing link");
            self.record_audit(blueprint_version_id, actor, CompileOutcome::ReusedExisting, 0, 0);
            return CompileResult {
                success: true,
                compiled_flow_version_id: Some(*existing),
                errors: Vec::new(),
                warnings: Vec::new(),
            };
        }

        let mut blueprint = blueprint.clone();
        let outcome = validate_blueprint(&blueprint, force_normalize_weights);
        if !outcome.is_valid() {
            warn!(errors = outcome.errors.len(), "blueprint failed publish validation");
            self.record_audit(blueprint_version_id, actor, CompileOutcome::Failed, outcome.warnings.len(), outcome.errors.len());
            return CompileResult {
                success: false,
                compiled_flow_version_id: None,
                errors: outcome.errors,
                warnings: outcome.warnings,
            };
        }

        if force_normalize_weights {
            crate::validator::normalize_weights(&mut blueprint);
        }

        let artifacts = map_blueprint_to_artifacts(&blueprint, blueprint_version_id, company_id, blueprint.version_number + 1);
        let flow_version_id = artifacts.flow_version.id;
        let transaction = CompileTransaction { artifacts };

        // Commit: this is the single point where the transaction becomes visible.
        self.store.insert(flow_version_id, transaction.artifacts);
        self.links.insert(blueprint_version_id, flow_version_id);

        info!(blueprint_version_id = %blueprint_version_id, flow_version_id = %flow_version_id, "compiled blueprint");
        self.record_audit(blueprint_version_id, actor, CompileOutcome::Succeeded, outcome.warnings.len(), 0);

        CompileResult {
            success: true,
            compiled_flow_version_id: Some(flow_version_id),
            errors: Vec::new(),
            warnings: outcome.warnings,
        }
    }

    fn record_audit(&self, blueprint_version_id: BlueprintVersionId, actor: &str, outcome: CompileOutcome, warning_count: usize, error_count: usize) {
        self.audit_log.lock().push(CompileAuditEntry {
            blueprint_version_id,
            actor: actor.to_string(),
            timestamp: chrono::Utc::now(),
            outcome,
            warning_count,
            error_count,
        });
    }
}
