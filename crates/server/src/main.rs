use qa_config::Settings;
use qa_core::traits::LlmProvider;
use qa_llm::{HttpEmbeddingConfig, HttpEmbeddingProvider, HttpLlmBackend, HttpLlmConfig, LlmBackend};
use qa_server::{build_app, AppState, AsrConfig, HttpAsrProvider};
use std::env;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config_path = env::var("QA_CONFIG_FILE").ok();
    let settings = Settings::load(config_path.as_deref())?;

    let asr = Arc::new(HttpAsrProvider::new(AsrConfig { api_key: env::var("QA_ASR_API_KEY").ok(), ..AsrConfig::default() })?);

    let llm_backend: Option<Arc<dyn LlmBackend>> = match env::var("QA_LLM_ENDPOINT") {
        Ok(endpoint) => {
            let config = HttpLlmConfig { endpoint, api_key: env::var("QA_LLM_API_KEY").ok(), ..HttpLlmConfig::default() };
            Some(Arc::new(HttpLlmBackend::new(config)?))
        }
        Err(_) => {
            tracing::warn!("QA_LLM_ENDPOINT not set, stage evaluation will use the deterministic fallback for every stage");
            None
        }
    };

    let embedding_provider: Option<Arc<dyn LlmProvider>> = match env::var("QA_EMBEDDING_API_KEY") {
        Ok(api_key) => {
            let config = HttpEmbeddingConfig { api_key: Some(api_key), ..HttpEmbeddingConfig::default() };
            Some(Arc::new(HttpEmbeddingProvider::new(config)?))
        }
        Err(_) => {
            tracing::warn!("QA_EMBEDDING_API_KEY not set, semantic detection will use the deterministic fallback embedder");
            None
        }
    };

    let state = AppState::new(settings, asr, llm_backend, embedding_provider);

    let worker_state = state.clone();
    tokio::spawn(qa_server::worker::run(worker_state));

    let cors_origins: Vec<String> = env::var("QA_CORS_ORIGINS").map(|v| v.split(',').map(str::to_string).collect()).unwrap_or_default();
    let api_key = env::var("QA_API_KEY").ok();
    let app = build_app(state, &cors_origins, api_key);

    let addr = env::var("QA_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "qa-engine listening");
    axum::serve(listener, app).await?;

    Ok(())
}
