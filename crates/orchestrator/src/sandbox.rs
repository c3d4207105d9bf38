//! Sandbox evaluation runner (C12): exercises a Blueprint's compiled flow
//! against a transcript without ever writing an `Evaluation` row. Compiles
//! the Blueprint synchronously first if it has no compiled flow yet, then
//! runs the same detection -> rules -> llm -> scoring core the recording
//! path uses.

use async_trait::async_trait;
use dashmap::DashMap;
use qa_compiler::BlueprintCompiler;
use qa_core::error::{Error, Result};
use qa_core::ids::{BlueprintVersionId, SandboxRunId};
use qa_core::{Blueprint, BlueprintId, RecordingId, SandboxResult, SandboxRun, SandboxStatus, Transcript};
use qa_pipeline::{CompiledFlowContext, EvaluationPipeline, ProcessingTrace};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxEvaluateTask {
    pub sandbox_run_id: SandboxRunId,
    pub blueprint_id: BlueprintId,
    pub blueprint_company_id: String,
    pub blueprint_version_id: BlueprintVersionId,
    /// The Blueprint snapshot being tested. Carried in the task payload
    /// rather than looked up, since a sandbox run commonly targets an
    /// unpublished draft that a Blueprint store would not resolve by id.
    pub blueprint: Blueprint,
    pub recording_id: Option<RecordingId>,
    pub transcript: Option<Transcript>,
    pub audio_url: Option<String>,
}

#[async_trait]
pub trait SandboxRunStore: Send + Sync {
    async fn save(&self, run: SandboxRun) -> Result<()>;
    async fn get(&self, id: SandboxRunId) -> Result<Option<SandboxRun>>;
}

#[derive(Default)]
pub struct InMemorySandboxRunStore {
    runs: DashMap<SandboxRunId, SandboxRun>,
}

impl InMemorySandboxRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SandboxRunStore for InMemorySandboxRunStore {
    async fn save(&self, run: SandboxRun) -> Result<()> {
        self.runs.insert(run.id, run);
        Ok(())
    }

    async fn get(&self, id: SandboxRunId) -> Result<Option<SandboxRun>> {
        Ok(self.runs.get(&id).map(|r| r.clone()))
    }
}

pub struct SandboxRunner {
    compiler: Arc<BlueprintCompiler>,
    pipeline: Arc<EvaluationPipeline>,
    runs: Arc<dyn SandboxRunStore>,
}

impl SandboxRunner {
    pub fn new(compiler: Arc<BlueprintCompiler>, pipeline: Arc<EvaluationPipeline>, runs: Arc<dyn SandboxRunStore>) -> Self {
        Self { compiler, pipeline, runs }
    }

    pub async fn run(&self, task: SandboxEvaluateTask) -> Result<SandboxRun> {
        let mut run = SandboxRun::queued(task.blueprint_id, None);
        run.id = task.sandbox_run_id;
        run.status = SandboxStatus::Running;
        self.runs.save(run.clone()).await?;

        match self.execute(&task).await {
            Ok(result) => {
                run.status = SandboxStatus::Succeeded;
                run.result = Some(result);
            }
            Err(err) => {
                run.status = SandboxStatus::Failed;
                run.error = Some(err.truncated_message(500));
            }
        }
        self.runs.save(run.clone()).await?;
        Ok(run)
    }

    pub async fn get(&self, id: SandboxRunId) -> Result<Option<SandboxRun>> {
        self.runs.get(id).await
    }

    async fn execute(&self, task: &SandboxEvaluateTask) -> Result<SandboxResult> {
        let compile_result = self.compiler.compile(&task.blueprint, task.blueprint_version_id, &task.blueprint_company_id, false, "sandbox");
        if !compile_result.success {
            let reasons: Vec<String> = compile_result.errors.iter().map(|e| e.message.clone()).collect();
            return Err(Error::compilation(reasons.join("; ")));
        }
        let flow_version_id = compile_result
            .compiled_flow_version_id
            .ok_or_else(|| Error::internal("compile reported success with no flow version id"))?;

        let (flow_stages, flow_steps, compliance_rules, rubric) = {
            let artifacts = self
                .compiler
                .compiled_artifacts(flow_version_id)
                .ok_or_else(|| Error::internal("compiled artifacts missing immediately after compile"))?;
            (artifacts.flow_stages.clone(), artifacts.flow_steps.clone(), artifacts.compliance_rules.clone(), artifacts.rubric_template.clone())
        };
        let flow = CompiledFlowContext { flow_version_id, flow_stages: &flow_stages, flow_steps: &flow_steps, compliance_rules: &compliance_rules, rubric: &rubric };

        let transcript = self.pipeline.acquire_transcript(task.recording_id, task.audio_url.as_deref(), task.transcript.clone()).await?;
        let mut trace = ProcessingTrace::new();
        let core = self.pipeline.evaluate_core(&transcript, &flow, &mut trace).await;

        Ok(SandboxResult {
            overall_score: core.overall_score,
            overall_passed: core.overall_passed,
            requires_human_review: core.requires_human_review,
            confidence_score: core.confidence_score,
            deterministic_results: serde_json::to_value(&core.deterministic_results).unwrap_or(serde_json::Value::Null),
            llm_stage_evaluations: serde_json::to_value(&core.llm_stage_evaluations).unwrap_or(serde_json::Value::Null),
            final_evaluation: serde_json::to_value(&core.final_evaluation).unwrap_or(serde_json::Value::Null),
            usage_estimate: Some(serde_json::json!({
                "stage_count": flow_stages.len(),
                "step_count": flow_steps.len(),
                "checkpoints": trace.checkpoints().len(),
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as async_trait_alias;
    use qa_config::Settings;
    use qa_core::error::Result as QaResult;
    use qa_core::traits::{AsrProvider, AsrResult};
    use qa_core::{Behavior, BehaviorType, DetectionMode, DiarizedSegment, Speaker, Stage};
    use qa_pipeline::InMemoryEvaluationStore;

    struct StubAsr;

    #[async_trait_alias]
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

    #[tokio::test]
    async fn compiles_on_demand_and_produces_a_sandbox_result() {
        let compiler = Arc::new(BlueprintCompiler::new());
        let pipeline = Arc::new(EvaluationPipeline::new(Settings::default(), Arc::new(StubAsr), None, None, Arc::new(InMemoryEvaluationStore::new())));
        let runner = SandboxRunner::new(compiler, pipeline, Arc::new(InMemorySandboxRunStore::new()));

        let blueprint = sample_blueprint();
        let task = SandboxEvaluateTask {
            sandbox_run_id: SandboxRunId::new(),
            blueprint_id: blueprint.id,
            blueprint_company_id: "acme".into(),
            blueprint_version_id: BlueprintVersionId::new(),
            blueprint,
            recording_id: None,
            transcript: None,
            audio_url: Some("https://example.com/call.wav".into()),
        };

        let run = runner.run(task).await.unwrap();
        assert_eq!(run.status, SandboxStatus::Succeeded);
        assert!(run.result.is_some());
    }

    #[tokio::test]
    async fn a_second_run_with_the_same_blueprint_version_reuses_the_compiled_flow() {
        let compiler = Arc::new(BlueprintCompiler::new());
        let pipeline = Arc::new(EvaluationPipeline::new(Settings::default(), Arc::new(StubAsr), None, None, Arc::new(InMemoryEvaluationStore::new())));
        let runner = SandboxRunner::new(compiler.clone(), pipeline, Arc::new(InMemorySandboxRunStore::new()));

        let blueprint = sample_blueprint();
        let blueprint_version_id = BlueprintVersionId::new();
        let make_task = || SandboxEvaluateTask {
            sandbox_run_id: SandboxRunId::new(),
            blueprint_id: blueprint.id,
            blueprint_company_id: "acme".into(),
            blueprint_version_id,
            blueprint: blueprint.clone(),
            recording_id: None,
            transcript: None,
            audio_url: Some("https://example.com/call.wav".into()),
        };

        runner.run(make_task()).await.unwrap();
        runner.run(make_task()).await.unwrap();
        assert_eq!(compiler.audit_log().len(), 2);
    }
}
