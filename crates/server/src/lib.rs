//! HTTP surface for the QA evaluation engine: Blueprint publish, recording
//! evaluation, sandbox runs, and the internal task endpoints a worker loop
//! dispatches against. Everything here is wiring — compilation, detection,
//! rules, LLM judgment, and scoring all live in their own crates.

pub mod asr;
pub mod auth;
pub mod routes;
pub mod state;
pub mod worker;

pub use asr::{AsrConfig, HttpAsrProvider};
pub use auth::{auth_middleware, ApiKeyConfig};
pub use routes::create_router;
pub use state::{AppState, BlueprintRegistry, JobStatus, JobStatusStore, PublishJob};

use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_http::compression::CompressionLayer;

/// Builds the full router with tracing, compression, and CORS layered on
/// top, and the auth middleware wired in with whatever key the caller
/// configured (`None` disables it).
pub fn build_app(state: AppState, cors_origins: &[String], api_key: Option<String>) -> axum::Router {
    let router = create_router(state);
    router
        .layer(axum::middleware::from_fn(auth_middleware))
        .layer(axum::Extension(ApiKeyConfig(api_key)))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(cors_origins))
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        tracing::warn!("no CORS origins configured, allowing all origins");
        return CorsLayer::new().allow_origin(Any).allow_methods([Method::GET, Method::POST, Method::DELETE]).allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    if parsed.is_empty() {
        tracing::error!("all configured CORS origins were invalid, falling back to permissive");
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
        .allow_credentials(true)
}
