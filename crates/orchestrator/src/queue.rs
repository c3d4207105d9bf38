//! At-least-once task queue (C12). Idempotency keys collapse duplicate
//! deliveries at enqueue time rather than leaving dedup to the handler, the
//! same way the compiler's `links` map collapses duplicate compiles.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use qa_core::error::Result;
use serde_json::Value;
use std::collections::VecDeque;

pub use qa_core::traits::TaskQueue;

#[derive(Debug, Clone)]
pub struct TaskMessage {
    pub id: String,
    pub task_handler: String,
    pub payload: Value,
    pub idempotency_key: String,
    pub delay_s: Option<u64>,
}

/// In-memory queue backing the three internal task handlers. A real
/// deployment would swap this for a durable broker; the idempotency
/// contract is identical either way, so handlers never need to know which
/// one they're running against.
#[derive(Default)]
pub struct InMemoryTaskQueue {
    seen: DashMap<String, String>,
    messages: Mutex<VecDeque<TaskMessage>>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pops the next message for a worker loop to process, FIFO.
    pub fn pop(&self) -> Option<TaskMessage> {
        self.messages.lock().pop_front()
    }

    /// Drains every currently queued message, in enqueue order.
    pub fn drain(&self) -> Vec<TaskMessage> {
        self.messages.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task_handler: &str, payload: Value, idempotency_key: &str, delay_s: Option<u64>) -> Result<String> {
        if let Some(existing) = self.seen.get(idempotency_key) {
            tracing::debug!(idempotency_key, task_handler, "enqueue collapsed into existing message");
            return Ok(existing.clone());
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.seen.insert(idempotency_key.to_string(), id.clone());
        self.messages.lock().push_back(TaskMessage {
            id: id.clone(),
            task_handler: task_handler.to_string(),
            payload,
            idempotency_key: idempotency_key.to_string(),
            delay_s,
        });
        tracing::info!(message_id = %id, task_handler, idempotency_key, "task enqueued");
        Ok(id)
    }
}
