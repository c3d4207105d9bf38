//! Task queue, idempotent dispatch, and sandbox evaluation runner (C12):
//! the glue between the HTTP surface and the compiler/pipeline crates.
//! Everything here is a thin dispatcher — the actual work happens in
//! `qa-compiler` and `qa-pipeline`.

pub mod handlers;
pub mod queue;
pub mod sandbox;

pub use handlers::{CompileBlueprintTask, ProcessRecordingTask, TaskHandlers};
pub use queue::{InMemoryTaskQueue, TaskMessage, TaskQueue};
pub use sandbox::{InMemorySandboxRunStore, SandboxEvaluateTask, SandboxRunStore, SandboxRunner};
