//! The three task handlers queued by §6's internal endpoints
//! (`/tasks/compile-blueprint`, `/tasks/sandbox-evaluate`,
//! `/tasks/process-recording`). Each is callable two ways: as a `Value`
//! payload pulled off the queue by a worker loop, or directly with its
//! typed task struct when a caller wants the synchronous path (the server
//! layer uses the latter for `sandbox-evaluate`'s `mode=sync`).

use crate::sandbox::{SandboxEvaluateTask, SandboxRunner};
use qa_compiler::{BlueprintCompiler, CompileResult};
use qa_core::error::{Error, Result};
use qa_core::ids::{BlueprintVersionId, CompiledFlowVersionId};
use qa_core::{Blueprint, BlueprintId, BlueprintStatus, Evaluation, RecordingId, SandboxRun};
use qa_pipeline::{CompiledFlowContext, EvaluationPipeline, EvaluationRequest, EvaluationStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileBlueprintTask {
    pub blueprint_version_id: BlueprintVersionId,
    pub company_id: String,
    pub blueprint: Blueprint,
    pub force_normalize_weights: bool,
    pub actor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecordingTask {
    pub recording_id: RecordingId,
    pub recording_company_id: String,
    pub blueprint_id: BlueprintId,
    pub blueprint_company_id: String,
    pub blueprint_status: BlueprintStatus,
    pub compiled_flow_version_id: CompiledFlowVersionId,
    pub audio_url: Option<String>,
}

pub struct TaskHandlers {
    compiler: Arc<BlueprintCompiler>,
    pipeline: Arc<EvaluationPipeline>,
    store: Arc<dyn EvaluationStore>,
    sandbox: Arc<SandboxRunner>,
}

impl TaskHandlers {
    pub fn new(compiler: Arc<BlueprintCompiler>, pipeline: Arc<EvaluationPipeline>, store: Arc<dyn EvaluationStore>, sandbox: Arc<SandboxRunner>) -> Self {
        Self { compiler, pipeline, store, sandbox }
    }

    pub fn compile_blueprint(&self, task: CompileBlueprintTask) -> CompileResult {
        self.compiler.compile(&task.blueprint, task.blueprint_version_id, &task.company_id, task.force_normalize_weights, &task.actor)
    }

    pub async fn process_recording(&self, task: ProcessRecordingTask) -> Result<Evaluation> {
        let artifacts = self
            .compiler
            .compiled_artifacts(task.compiled_flow_version_id)
            .ok_or_else(|| Error::precondition("blueprint has no compiled flow for this version"))?;

        let flow = CompiledFlowContext {
            flow_version_id: task.compiled_flow_version_id,
            flow_stages: &artifacts.flow_stages,
            flow_steps: &artifacts.flow_steps,
            compliance_rules: &artifacts.compliance_rules,
            rubric: &artifacts.rubric_template,
        };

        let request = EvaluationRequest {
            recording_id: task.recording_id,
            recording_company_id: task.recording_company_id,
            blueprint_id: task.blueprint_id,
            blueprint_company_id: task.blueprint_company_id,
            blueprint_status: task.blueprint_status,
            flow,
            audio_url: task.audio_url,
            transcript: None,
        };

        self.pipeline.run_for_recording(request).await
    }

    pub async fn sandbox_evaluate(&self, task: SandboxEvaluateTask) -> Result<SandboxRun> {
        self.sandbox.run(task).await
    }

    pub async fn recording_evaluation(&self, recording_id: RecordingId) -> Result<Option<Evaluation>> {
        self.store.get_evaluation(recording_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qa_config::Settings;
    use qa_core::error::Result as QaResult;
    use qa_core::traits::{AsrProvider, AsrResult};
    use qa_core::{Behavior, BehaviorType, DetectionMode, DiarizedSegment, Speaker, Stage};
    use qa_pipeline::InMemoryEvaluationStore;

    struct StubAsr;

    #[async_trait]
    impl AsrProvider for StubAsr {
        async fn transcribe(&self, _audio_url: &str) -> QaResult<AsrResult> {
            Ok(AsrResult {
                transcript_text: String::new(),
                diarized_segments: vec![DiarizedSegment {
                    speaker: Speaker::Agent,
                    text: "Thank you for calling, how can I help?".into(),
                    start_s: 0.0,
                    end_s: 3.0,
                    confidence: 0.9,
                }],
                confidence: 0.9,
                sentiment: None,
            })
        }
    }

    fn sample_blueprint() -> Blueprint {
        let mut blueprint = Blueprint::new("acme", "Greeting Flow");
        let mut stage = Stage::new("Opening", 0);
        stage.stage_weight = Some(100.0);
        stage.behaviors.push(Behavior::new("greet", BehaviorType::Required, DetectionMode::ExactPhrase).with_phrases(vec!["thank you for calling".into()]));
        blueprint.stages.push(stage);
        blueprint
    }

    fn make_handlers() -> (TaskHandlers, Arc<BlueprintCompiler>) {
        let compiler = Arc::new(BlueprintCompiler::new());
        let store = Arc::new(InMemoryEvaluationStore::new());
        let pipeline = Arc::new(EvaluationPipeline::new(Settings::default(), Arc::new(StubAsr), None, None, store.clone()));
        let sandbox = Arc::new(crate::sandbox::SandboxRunner::new(compiler.clone(), pipeline.clone(), Arc::new(crate::sandbox::InMemorySandboxRunStore::new())));
        (TaskHandlers::new(compiler.clone(), pipeline, store, sandbox), compiler)
    }

    #[tokio::test]
    async fn compile_then_process_recording_completes_an_evaluation() {
        let (handlers, _compiler) = make_handlers();
        let blueprint = sample_blueprint();
        let blueprint_version_id = BlueprintVersionId::new();

        let compile_result = handlers.compile_blueprint(CompileBlueprintTask {
            blueprint_version_id,
            company_id: "acme".into(),
            blueprint: blueprint.clone(),
            force_normalize_weights: false,
            actor: "publisher@acme".into(),
        });
        assert!(compile_result.success);

        let evaluation = handlers
            .process_recording(ProcessRecordingTask {
                recording_id: RecordingId::new(),
                recording_company_id: "acme".into(),
                blueprint_id: blueprint.id,
                blueprint_company_id: "acme".into(),
                blueprint_status: BlueprintStatus::Published,
                compiled_flow_version_id: compile_result.compiled_flow_version_id.unwrap(),
                audio_url: Some("https://example.com/call.wav".into()),
            })
            .await
            .unwrap();
        assert!(evaluation.overall_score > 0.0);
    }

    #[tokio::test]
    async fn process_recording_rejects_an_uncompiled_flow_version() {
        let (handlers, _compiler) = make_handlers();
        let result = handlers
            .process_recording(ProcessRecordingTask {
                recording_id: RecordingId::new(),
                recording_company_id: "acme".into(),
                blueprint_id: BlueprintId::new(),
                blueprint_company_id: "acme".into(),
                blueprint_status: BlueprintStatus::Published,
                compiled_flow_version_id: CompiledFlowVersionId::new(),
                audio_url: None,
            })
            .await;
        assert!(matches!(result, Err(Error::Precondition(_))));
    }
}
