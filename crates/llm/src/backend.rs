//! LLM backend abstraction with the retry/backoff idiom used throughout
//! this workspace's provider adapters: a small bounded number of attempts,
//! exponential backoff, and a hard distinction between retryable transport
//! failures and fatal provider rejections.

use async_trait::async_trait;
use qa_core::error::{Error, Result};
use qa_core::traits::{LlmProvider, LlmResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    /// Deterministic by default: temperature 0, fixed top_p, per the
    /// stage-evaluator's reproducibility contract.
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 1024,
        }
    }
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn generate(&self, prompt: &str, schema: &Value, params: &GenerationParams) -> Result<Value>;
    fn is_available(&self) -> bool {
        true
    }
    fn model_name(&self) -> &str;
}

/// Distinguishes a retryable transport/provider hiccup from a fatal
/// rejection — 4xx-style errors should not be retried, 5xx/timeout should.
fn is_retryable(err: &Error) -> bool {
    matches!(err, Error::Transcription(_) | Error::Internal(_))
}

/// Drives `backend.generate` with the workspace's standard retry policy:
/// 3 attempts, exponential backoff starting at `initial_backoff`.
pub async fn generate_with_retry(
    backend: &dyn LlmBackend,
    prompt: &str,
    schema: &Value,
    params: &GenerationParams,
    max_attempts: u32,
    initial_backoff: Duration,
) -> Result<Value> {
    let mut backoff = initial_backoff;
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        match backend.generate(prompt, schema, params).await {
            Ok(response) => return Ok(response),
            Err(err) if is_retryable(&err) && attempt < max_attempts => {
                warn!(attempt, backoff_ms = backoff.as_millis(), error = %err, "llm generate failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err.unwrap_or_else(|| Error::internal("llm generate exhausted retries with no recorded error")))
}

/// Configuration for an `HttpLlmBackend`.
#[derive(Debug, Clone)]
pub struct HttpLlmConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for HttpLlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api/chat".to_string(),
            model: "llama3:8b-instruct".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Structured-output LLM backend for a live provider. A stage prompt and
/// its JSON schema go out as one chat request; the schema is attached as a
/// `format` field the way Ollama and OpenAI-compatible chat endpoints both
/// accept it, so swapping the endpoint is a config change, not a code one.
pub struct HttpLlmBackend {
    client: reqwest::Client,
    config: HttpLlmConfig,
}

impl HttpLlmBackend {
    pub fn new(config: HttpLlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build llm http client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
    format: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f64,
    top_p: f64,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[async_trait]
impl LlmBackend for HttpLlmBackend {
    async fn generate(&self, prompt: &str, schema: &Value, params: &GenerationParams) -> Result<Value> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage { role: "user", content: prompt }],
            stream: false,
            format: schema,
            options: Some(ChatOptions { temperature: params.temperature, top_p: params.top_p, num_predict: params.max_tokens }),
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Transcription(format!("llm request timed out: {e}"))
            } else {
                Error::Transcription(format!("llm request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(Error::Transcription(format!("llm server error {status}: {body}")));
            }
            return Err(Error::LlmValidation(format!("llm provider rejected request {status}: {body}")));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| Error::LlmValidation(format!("malformed llm response: {e}")))?;
        serde_json::from_str(&parsed.message.content).map_err(|e| Error::LlmValidation(format!("llm response was not valid json for the requested schema: {e}")))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Configuration for an `HttpEmbeddingProvider`.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for HttpEmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models/text-embedding-004:embedContent".to_string(),
            model: "text-embedding-004".to_string(),
            api_key: None,
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Serialize)]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: EmbedContent<'a>,
    #[serde(rename = "taskType")]
    task_type: &'a str,
}

#[derive(Serialize)]
struct EmbedContent<'a> {
    parts: [EmbedContentPart<'a>; 1],
}

#[derive(Serialize)]
struct EmbedContentPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: EmbedContentValues,
}

#[derive(Deserialize)]
struct EmbedContentValues {
    values: Vec<f32>,
}

/// `LlmProvider` embedding arm for a Gemini-compatible `embedContent`
/// endpoint. `generate` is unsupported here — this provider exists only to
/// give the detection embedding service a real call to attempt before it
/// falls back to the hash-based vector.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    config: HttpEmbeddingConfig,
}

impl HttpEmbeddingProvider {
    pub fn new(config: HttpEmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build embedding http client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LlmProvider for HttpEmbeddingProvider {
    async fn generate(&self, _prompt: &str, _schema: &Value, _params: &Value) -> Result<LlmResponse> {
        Err(Error::internal("HttpEmbeddingProvider only supports embed"))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let max_chars = 8000;
        let truncated = if text.len() > max_chars { &text[..max_chars] } else { text };

        let request = EmbedContentRequest {
            model: &format!("models/{}", self.config.model),
            content: EmbedContent { parts: [EmbedContentPart { text: truncated }] },
            task_type: "retrieval_document",
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.query(&[("key", api_key.as_str())]);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Transcription(format!("embedding request timed out: {e}"))
            } else {
                Error::Transcription(format!("embedding request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transcription(format!("embedding provider rejected request {status}: {body}")));
        }

        let parsed: EmbedContentResponse = response.json().await.map_err(|e| Error::LlmValidation(format!("malformed embedding response: {e}")))?;
        Ok(parsed.embedding.values)
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Deterministic in-process backend for tests and for sandbox runs that
/// want to avoid a live provider dependency.
pub struct MockBackend {
    pub response: Value,
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn generate(&self, _prompt: &str, _schema: &Value, _params: &GenerationParams) -> Result<Value> {
        Ok(self.response.clone())
    }

    fn model_name(&self) -> &str {
        "mock-backend"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyBackend {
        fail_times: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl LlmBackend for FlakyBackend {
        async fn generate(&self, _prompt: &str, _schema: &Value, _params: &GenerationParams) -> Result<Value> {
            let remaining = self.fail_times.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            if remaining > 0 {
                Err(Error::internal("transient failure"))
            } else {
                Ok(serde_json::json!({"ok": true}))
            }
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let backend = FlakyBackend { fail_times: std::sync::atomic::AtomicU32::new(1) };
        let result = generate_with_retry(&backend, "p", &Value::Null, &GenerationParams::default(), 3, Duration::from_millis(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn mock_backend_returns_configured_response() {
        let backend = MockBackend { response: serde_json::json!({"stage_score": 90}) };
        let result = backend.generate("p", &Value::Null, &GenerationParams::default()).await.unwrap();
        assert_eq!(result["stage_score"], 90);
    }
}
