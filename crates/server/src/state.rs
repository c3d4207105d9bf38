//! Shared application state, handed to every route via axum's `State`
//! extractor. Blueprint authoring is out of core scope, so `BlueprintRegistry`
//! is a minimal in-memory store that exists only so publish/evaluate/sandbox
//! routes have somewhere to resolve a Blueprint by id, not a real CRUD layer.

use dashmap::DashMap;
use parking_lot::RwLock;
use qa_compiler::BlueprintCompiler;
use qa_config::Settings;
use qa_core::error::{Error, Result};
use qa_core::traits::{AsrProvider, LlmProvider};
use qa_core::{Blueprint, BlueprintId};
use qa_llm::LlmBackend;
use qa_orchestrator::{InMemorySandboxRunStore, InMemoryTaskQueue, SandboxRunner, TaskHandlers};
use qa_pipeline::{EvaluationPipeline, EvaluationStore, InMemoryEvaluationStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Status of a publish job as surfaced by `GET /blueprints/{id}/publish-status/{job_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishJob {
    pub job_id: String,
    pub blueprint_id: BlueprintId,
    pub status: JobStatus,
    pub compiled_flow_version_id: Option<String>,
    pub errors: Vec<String>,
}

/// Tracks publish jobs by id so the status endpoint can be polled
/// independently of the worker loop that actually runs compilation.
#[derive(Default)]
pub struct JobStatusStore {
    jobs: DashMap<String, PublishJob>,
}

impl JobStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: PublishJob) {
        self.jobs.insert(job.job_id.clone(), job);
    }

    pub fn update(&self, job_id: &str, f: impl FnOnce(&mut PublishJob)) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            f(&mut job);
        }
    }

    pub fn get(&self, job_id: &str) -> Option<PublishJob> {
        self.jobs.get(job_id).map(|j| j.clone())
    }
}

/// Blueprint authoring (create/update/delete of Blueprints, Stages,
/// Behaviors) is out of core scope. This registry is the minimal
/// pass-through needed for the rest of the system to find a Blueprint by
/// id — publish, evaluate, and sandbox all depend on that lookup.
#[derive(Default)]
pub struct BlueprintRegistry {
    blueprints: RwLock<std::collections::HashMap<BlueprintId, Blueprint>>,
}

impl BlueprintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, blueprint: Blueprint) {
        self.blueprints.write().insert(blueprint.id, blueprint);
    }

    pub fn get(&self, id: BlueprintId) -> Option<Blueprint> {
        self.blueprints.read().get(&id).cloned()
    }

    pub fn set_compiled_flow_version(&self, id: BlueprintId, flow_version_id: qa_core::CompiledFlowVersionId) {
        if let Some(blueprint) = self.blueprints.write().get_mut(&id) {
            blueprint.compiled_flow_version_id = Some(flow_version_id);
        }
    }

    pub fn set_status(&self, id: BlueprintId, status: qa_core::BlueprintStatus) {
        if let Some(blueprint) = self.blueprints.write().get_mut(&id) {
            blueprint.status = status;
        }
    }

    pub fn remove(&self, id: BlueprintId) {
        self.blueprints.write().remove(&id);
    }
}

pub struct AppState {
    pub settings: Arc<RwLock<Settings>>,
    pub blueprints: Arc<BlueprintRegistry>,
    pub compiler: Arc<BlueprintCompiler>,
    pub pipeline: Arc<EvaluationPipeline>,
    pub evaluation_store: Arc<dyn EvaluationStore>,
    pub queue: Arc<InMemoryTaskQueue>,
    pub handlers: Arc<TaskHandlers>,
    pub sandbox: Arc<SandboxRunner>,
    pub jobs: Arc<JobStatusStore>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            blueprints: self.blueprints.clone(),
            compiler: self.compiler.clone(),
            pipeline: self.pipeline.clone(),
            evaluation_store: self.evaluation_store.clone(),
            queue: self.queue.clone(),
            handlers: self.handlers.clone(),
            sandbox: self.sandbox.clone(),
            jobs: self.jobs.clone(),
        }
    }
}

impl AppState {
    pub fn new(
        settings: Settings,
        asr: Arc<dyn AsrProvider>,
        llm_backend: Option<Arc<dyn LlmBackend>>,
        embedding_provider: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        let evaluation_store: Arc<dyn EvaluationStore> = Arc::new(InMemoryEvaluationStore::new());
        let compiler = Arc::new(BlueprintCompiler::new());
        let pipeline = Arc::new(EvaluationPipeline::new(settings.clone(), asr, llm_backend, embedding_provider, evaluation_store.clone()));
        let sandbox_runs = Arc::new(InMemorySandboxRunStore::new());
        let sandbox = Arc::new(SandboxRunner::new(compiler.clone(), pipeline.clone(), sandbox_runs));
        let handlers = Arc::new(TaskHandlers::new(compiler.clone(), pipeline.clone(), evaluation_store.clone(), sandbox.clone()));

        Self {
            settings: Arc::new(RwLock::new(settings)),
            blueprints: Arc::new(BlueprintRegistry::new()),
            compiler,
            pipeline,
            evaluation_store,
            queue: Arc::new(InMemoryTaskQueue::new()),
            handlers,
            sandbox,
            jobs: Arc::new(JobStatusStore::new()),
        }
    }

    pub fn resolve_blueprint(&self, id: BlueprintId) -> Result<Blueprint> {
        self.blueprints.get(id).ok_or_else(|| Error::precondition(format!("no blueprint registered with id {id}")))
    }
}
