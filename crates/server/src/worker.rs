//! Background loop that pops queued tasks and dispatches them to
//! `TaskHandlers`. Routes dispatch most tasks in-process for a synchronous
//! response already; this loop is what makes the at-least-once queue
//! actually at-least-once when a process restarts mid-flight or a caller
//! only wants the fire-and-forget `async` sandbox mode.

use crate::state::AppState;
use qa_orchestrator::{CompileBlueprintTask, ProcessRecordingTask, SandboxEvaluateTask};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub async fn run(state: AppState) {
    loop {
        match state.queue.pop() {
            Some(message) => dispatch(&state, message).await,
            None => tokio::time::sleep(POLL_INTERVAL).await,
        }
    }
}

async fn dispatch(state: &AppState, message: qa_orchestrator::TaskMessage) {
    let result = match message.task_handler.as_str() {
        "compile-blueprint" => match serde_json::from_value::<CompileBlueprintTask>(message.payload) {
            Ok(task) => {
                let blueprint_id = task.blueprint.id;
                let outcome = state.handlers.compile_blueprint(task);
                if outcome.success {
                    if let Some(flow_version_id) = outcome.compiled_flow_version_id {
                        state.blueprints.set_compiled_flow_version(blueprint_id, flow_version_id);
                    }
                    Ok(())
                } else {
                    Err(format!("compile-blueprint failed: {} error(s)", outcome.errors.len()))
                }
            }
            Err(err) => Err(format!("malformed compile-blueprint payload: {err}")),
        },
        "process-recording" => match serde_json::from_value::<ProcessRecordingTask>(message.payload) {
            Ok(task) => state.handlers.process_recording(task).await.map(|_| ()).map_err(|e| e.to_string()),
            Err(err) => Err(format!("malformed process-recording payload: {err}")),
        },
        "sandbox-evaluate" => match serde_json::from_value::<SandboxEvaluateTask>(message.payload) {
            Ok(task) => state.handlers.sandbox_evaluate(task).await.map(|_| ()).map_err(|e| e.to_string()),
            Err(err) => Err(format!("malformed sandbox-evaluate payload: {err}")),
        },
        other => Err(format!("no handler registered for task type {other}")),
    };

    match result {
        Ok(()) => tracing::debug!(message_id = %message.id, task_handler = %message.task_handler, "task completed"),
        Err(err) => tracing::error!(message_id = %message.id, task_handler = %message.task_handler, error = %err, "task failed"),
    }
}
