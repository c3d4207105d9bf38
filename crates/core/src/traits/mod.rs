//! Minimal async interfaces for the four external collaborators named in
//! the external-interfaces contract: ASR, LLM, task queue, object store.
//! Each is object-safe so callers can hold `Arc<dyn Trait>`.

mod asr;
mod llm;
mod object_store;
mod queue;

pub use asr::{AsrProvider, AsrResult};
pub use llm::{LlmProvider, LlmResponse};
pub use object_store::ObjectStore;
pub use queue::TaskQueue;
