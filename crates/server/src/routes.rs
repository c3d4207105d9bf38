//! The HTTP surface named by the external-interfaces contract: Blueprint
//! authoring stubs, publish, evaluate, sandbox-evaluate, and the three
//! internal task endpoints a worker loop (or an operator, by hand) can
//! invoke directly. Route handlers stay thin — the actual work lives in
//! `qa-compiler`, `qa-pipeline`, and `qa-orchestrator`.

use crate::state::{AppState, JobStatus, PublishJob};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use qa_core::error::Error;
use qa_core::{Blueprint, BlueprintId, BlueprintStatus, BlueprintVersionId, RecordingId, SandboxRunId};
use qa_orchestrator::{CompileBlueprintTask, ProcessRecordingTask, SandboxEvaluateTask};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Blueprint authoring is out of core scope; these are
        // pass-through stubs so the rest of the flow has somewhere to
        // register a Blueprint before publishing or sandboxing it.
        .route("/blueprints", post(create_blueprint))
        .route("/blueprints/:id", get(get_blueprint))
        .route("/blueprints/:id", axum::routing::delete(delete_blueprint))
        .route("/blueprints/:id/publish", post(publish_blueprint))
        .route("/blueprints/:id/publish-status/:job_id", get(publish_status))
        .route("/recordings/:id/evaluate", post(evaluate_recording))
        .route("/evaluations/:recording_id", get(get_evaluation))
        .route("/blueprints/:id/sandbox-evaluate", post(sandbox_evaluate))
        .route("/blueprints/:id/sandbox-runs/:run_id", get(sandbox_run_status))
        .route("/tasks/compile-blueprint", post(task_compile_blueprint))
        .route("/tasks/sandbox-evaluate", post(task_sandbox_evaluate))
        .route("/tasks/process-recording", post(task_process_recording))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}

/// Maps the internal error taxonomy onto the handful of HTTP status codes
/// this surface needs; `code()` stays in the body so clients don't have to
/// parse prose to branch on failure kind.
fn error_response(err: Error) -> Response {
    let status = match &err {
        Error::Validation(_) | Error::Compilation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Precondition(_) => StatusCode::CONFLICT,
        Error::LlmValidation(_) | Error::DetectionWarning(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Transcription(_) => StatusCode::BAD_GATEWAY,
        Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.code(), "message": err.to_string() }))).into_response()
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "version": env!("CARGO_PKG_VERSION") }))
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "status": "ready", "queue_depth": state.queue.len() }))
}

#[derive(Debug, Deserialize)]
struct CreateBlueprintRequest {
    company_id: String,
    name: String,
}

/// Pass-through stub: Blueprint authoring (create/update/delete of
/// Blueprints, Stages, Behaviors) is explicitly out of core scope. This
/// exists only so an author can register a draft to publish or sandbox.
async fn create_blueprint(State(state): State<AppState>, Json(request): Json<CreateBlueprintRequest>) -> impl IntoResponse {
    let blueprint = Blueprint::new(request.company_id, request.name);
    state.blueprints.put(blueprint.clone());
    (StatusCode::CREATED, Json(blueprint))
}

async fn get_blueprint(State(state): State<AppState>, Path(id): Path<BlueprintId>) -> Response {
    match state.resolve_blueprint(id) {
        Ok(blueprint) => Json(blueprint).into_response(),
        Err(err) => error_response(err),
    }
}

async fn delete_blueprint(State(state): State<AppState>, Path(id): Path<BlueprintId>) -> StatusCode {
    state.blueprints.remove(id);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    #[serde(default)]
    force_normalize_weights: bool,
    #[serde(default)]
    publish_note: Option<String>,
    #[serde(default)]
    compiler_options: Option<serde_json::Value>,
    #[serde(default = "default_actor")]
    actor: String,
}

fn default_actor() -> String {
    "api".to_string()
}

#[derive(Debug, Serialize)]
struct PublishAccepted {
    job_id: String,
    status: &'static str,
    links: serde_json::Value,
}

/// Queues a `compile-blueprint` task and returns immediately with a job id
/// to poll. The Blueprint transitions `Draft -> Published` only once
/// compilation actually succeeds, which the worker loop (not this handler)
/// performs.
async fn publish_blueprint(State(state): State<AppState>, Path(id): Path<BlueprintId>, Json(request): Json<PublishRequest>) -> Response {
    let blueprint = match state.resolve_blueprint(id) {
        Ok(b) => b,
        Err(err) => return error_response(err),
    };
    if !blueprint.status.can_transition_to(BlueprintStatus::Published) {
        return error_response(Error::precondition(format!("blueprint in status {:?} cannot be published", blueprint.status)));
    }
    let _ = request.publish_note;
    let _ = request.compiler_options;

    let blueprint_version_id = BlueprintVersionId::new();
    let task = CompileBlueprintTask {
        blueprint_version_id,
        company_id: blueprint.company_id.clone(),
        blueprint: blueprint.clone(),
        force_normalize_weights: request.force_normalize_weights,
        actor: request.actor,
    };
    let job_id = uuid::Uuid::new_v4().to_string();
    state.jobs.insert(PublishJob { job_id: job_id.clone(), blueprint_id: id, status: JobStatus::Queued, compiled_flow_version_id: None, errors: Vec::new() });

    let payload = serde_json::to_value(&task).unwrap_or(serde_json::Value::Null);
    let idempotency_key = format!("compile-{blueprint_version_id}");
    if let Err(err) = qa_core::traits::TaskQueue::enqueue(state.queue.as_ref(), "compile-blueprint", payload, &idempotency_key, None).await {
        return error_response(err);
    }

    tokio::spawn(run_publish_job(state, job_id.clone(), task));

    (
        StatusCode::ACCEPTED,
        Json(PublishAccepted { job_id: job_id.clone(), status: "queued", links: json!({ "status": format!("/blueprints/{id}/publish-status/{job_id}") }) }),
    )
        .into_response()
}

/// The background half of `publish_blueprint`: runs the compile task and
/// records its outcome so polling `publish_status` observes progress.
async fn run_publish_job(state: AppState, job_id: String, task: CompileBlueprintTask) {
    state.jobs.update(&job_id, |job| job.status = JobStatus::Running);
    let blueprint_id = task.blueprint.id;
    let result = state.handlers.compile_blueprint(task);
    if result.success {
        if let Some(flow_version_id) = result.compiled_flow_version_id {
            state.blueprints.set_compiled_flow_version(blueprint_id, flow_version_id);
            state.blueprints.set_status(blueprint_id, BlueprintStatus::Published);
        }
        state.jobs.update(&job_id, |job| {
            job.status = JobStatus::Succeeded;
            job.compiled_flow_version_id = result.compiled_flow_version_id.map(|id| id.to_string());
        });
    } else {
        state.jobs.update(&job_id, |job| {
            job.status = JobStatus::Failed;
            job.errors = result.errors.iter().map(|e| e.message.clone()).collect();
        });
    }
}

async fn publish_status(State(state): State<AppState>, Path((_id, job_id)): Path<(BlueprintId, String)>) -> Response {
    match state.jobs.get(&job_id) {
        Some(job) => Json(job).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "NotFound", "message": "no such publish job" }))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct EvaluateRequest {
    blueprint_id: BlueprintId,
}

#[derive(Debug, Serialize)]
struct EvaluateAccepted {
    evaluation_id: String,
    status: &'static str,
}

/// Enqueues `process-recording` for at-least-once durability and awaits the
/// same handler in-process so the caller gets a synchronous result when the
/// pipeline is fast enough. `run_for_recording`'s terminal-state
/// short-circuit makes a later redundant dispatch off the queue a no-op,
/// so doing both is safe rather than wasteful.
async fn evaluate_recording(State(state): State<AppState>, Path(recording_id): Path<RecordingId>, Json(request): Json<EvaluateRequest>) -> Response {
    let blueprint = match state.resolve_blueprint(request.blueprint_id) {
        Ok(b) => b,
        Err(err) => return error_response(err),
    };
    let Some(compiled_flow_version_id) = blueprint.compiled_flow_version_id else {
        return error_response(Error::precondition("blueprint has no compiled flow; publish it first"));
    };

    let task = ProcessRecordingTask {
        recording_id,
        recording_company_id: blueprint.company_id.clone(),
        blueprint_id: blueprint.id,
        blueprint_company_id: blueprint.company_id,
        blueprint_status: blueprint.status,
        compiled_flow_version_id,
        audio_url: None,
    };

    let payload = serde_json::to_value(&task).unwrap_or(serde_json::Value::Null);
    let idempotency_key = format!("evaluate-{recording_id}");
    if let Err(err) = qa_core::traits::TaskQueue::enqueue(state.queue.as_ref(), "process-recording", payload, &idempotency_key, None).await {
        return error_response(err);
    }

    match state.handlers.process_recording(task).await {
        Ok(evaluation) => (StatusCode::ACCEPTED, Json(EvaluateAccepted { evaluation_id: evaluation.id.to_string(), status: "completed" })).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_evaluation(State(state): State<AppState>, Path(recording_id): Path<RecordingId>) -> Response {
    match state.handlers.recording_evaluation(recording_id).await {
        Ok(Some(evaluation)) => Json(evaluation).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": "NotFound", "message": "no evaluation for this recording" }))).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SandboxMode {
    Sync,
    Async,
}

#[derive(Debug, Deserialize)]
struct SandboxInput {
    #[serde(default)]
    transcript: Option<qa_core::Transcript>,
    #[serde(default)]
    recording_id: Option<RecordingId>,
    #[serde(default)]
    audio_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SandboxRequest {
    mode: SandboxMode,
    input: SandboxInput,
}

/// Sync mode returns immediately with a `run_id` and runs evaluation in
/// the background; async mode queues the same work and expects the caller
/// to poll `sandbox_run_status`. Either way the Blueprint compiles first if
/// it has no compiled flow yet — `SandboxRunner::run` handles that.
async fn sandbox_evaluate(
    State(state): State<AppState>,
    Path(id): Path<BlueprintId>,
    headers: axum::http::HeaderMap,
    Json(request): Json<SandboxRequest>,
) -> Response {
    let blueprint = match state.resolve_blueprint(id) {
        Ok(b) => b,
        Err(err) => return error_response(err),
    };

    let idempotency_key = headers.get("Idempotency-Key").and_then(|v| v.to_str().ok()).map(str::to_string);
    let sandbox_run_id = SandboxRunId::new();
    // A sandbox run commonly targets an edited-but-unpublished draft, so it
    // gets its own throwaway version id rather than reusing the Blueprint's
    // last published one.
    let blueprint_version_id = BlueprintVersionId::new();
    let task = SandboxEvaluateTask {
        sandbox_run_id,
        blueprint_id: id,
        blueprint_company_id: blueprint.company_id.clone(),
        blueprint_version_id,
        blueprint,
        recording_id: request.input.recording_id,
        transcript: request.input.transcript,
        audio_url: request.input.audio_url,
    };

    let queue_key = idempotency_key.unwrap_or_else(|| format!("sandbox-{sandbox_run_id}"));
    let payload = serde_json::to_value(&task).unwrap_or(serde_json::Value::Null);
    if let Err(err) = qa_core::traits::TaskQueue::enqueue(state.queue.as_ref(), "sandbox-evaluate", payload, &queue_key, None).await {
        return error_response(err);
    }

    match request.mode {
        SandboxMode::Sync => {
            tokio::spawn(async move {
                let _ = state.handlers.sandbox_evaluate(task).await;
            });
            (StatusCode::ACCEPTED, Json(json!({ "run_id": sandbox_run_id }))).into_response()
        }
        SandboxMode::Async => (StatusCode::ACCEPTED, Json(json!({ "run_id": sandbox_run_id }))).into_response(),
    }
}

async fn sandbox_run_status(State(state): State<AppState>, Path((_id, run_id)): Path<(BlueprintId, SandboxRunId)>) -> Response {
    match state.sandbox.get(run_id).await {
        Ok(Some(run)) => Json(json!({ "status": run.status, "result": run.result })).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": "NotFound", "message": "no such sandbox run" }))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn task_compile_blueprint(State(state): State<AppState>, Json(task): Json<CompileBlueprintTask>) -> Response {
    let blueprint_id = task.blueprint.id;
    let result = state.handlers.compile_blueprint(task);
    if result.success {
        if let Some(flow_version_id) = result.compiled_flow_version_id {
            state.blueprints.set_compiled_flow_version(blueprint_id, flow_version_id);
        }
    }
    Json(json!({
        "success": result.success,
        "compiled_flow_version_id": result.compiled_flow_version_id,
        "errors": result.errors.iter().map(|e| &e.message).collect::<Vec<_>>(),
        "warnings": result.warnings.iter().map(|w| &w.message).collect::<Vec<_>>(),
    }))
    .into_response()
}

async fn task_sandbox_evaluate(State(state): State<AppState>, Json(task): Json<SandboxEvaluateTask>) -> Response {
    match state.handlers.sandbox_evaluate(task).await {
        Ok(run) => Json(run).into_response(),
        Err(err) => error_response(err),
    }
}

async fn task_process_recording(State(state): State<AppState>, Json(task): Json<ProcessRecordingTask>) -> Response {
    match state.handlers.process_recording(task).await {
        Ok(evaluation) => Json(evaluation).into_response(),
        Err(err) => error_response(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qa_config::Settings;
    use qa_core::error::Result as QaResult;
    use qa_core::traits::{AsrProvider, AsrResult};

    struct StubAsr;

    #[async_trait]
    impl AsrProvider for StubAsr {
        async fn transcribe(&self, _audio_url: &str) -> QaResult<AsrResult> {
            Ok(AsrResult { transcript_text: String::new(), diarized_segments: Vec::new(), confidence: 0.9, sentiment: None })
        }
    }

    #[test]
    fn router_builds_with_default_state() {
        let state = AppState::new(Settings::default(), std::sync::Arc::new(StubAsr), None, None);
        let _ = create_router(state);
    }
}
