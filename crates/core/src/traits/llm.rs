use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub structured: Value,
    pub raw_text: String,
}

/// External LLM collaborator: structured generation plus embedding.
/// `generate` is expected to honor `temperature`/`top_p` in `params` so
/// stage-evaluation prompts can be made reproducible.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, prompt: &str, schema: &Value, params: &Value) -> Result<LlmResponse>;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn is_available(&self) -> bool {
        true
    }
}
