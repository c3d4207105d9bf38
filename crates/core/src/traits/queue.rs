use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// At-least-once task queue. `idempotency_key` lets the orchestrator
/// collapse duplicate deliveries at the handler boundary.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(
        &self,
        task_handler: &str,
        payload: Value,
        idempotency_key: &str,
        delay_s: Option<u64>,
    ) -> Result<String>;
}
