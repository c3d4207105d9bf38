//! Bearer-token auth middleware. Blueprint authoring and most of the rest
//! of this surface sit behind it in a real deployment; the check itself is
//! intentionally the same shape regardless of which route it guards.

use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::atomic::{AtomicBool, Ordering};

static AUTH_DISABLED_WARNED: AtomicBool = AtomicBool::new(false);

/// Paths that never require a bearer token, regardless of configuration.
const PUBLIC_PATHS: &[&str] = &["/health", "/ready"];

/// Wired in once at router construction via an `Extension` layer. `None`
/// means auth is off, which is the default until an operator sets
/// `QA_API_KEY`.
#[derive(Clone, Default)]
pub struct ApiKeyConfig(pub Option<String>);

enum AuthCheck {
    Disabled,
    PublicPath,
    CheckKey(String),
}

fn check_auth_config(expected_key: &Option<String>, path: &str) -> AuthCheck {
    if PUBLIC_PATHS.iter().any(|p| path.starts_with(p)) {
        return AuthCheck::PublicPath;
    }
    match expected_key {
        Some(key) if !key.is_empty() => AuthCheck::CheckKey(key.clone()),
        _ => {
            if !AUTH_DISABLED_WARNED.swap(true, Ordering::Relaxed) {
                tracing::warn!("no API key configured, auth middleware is a pass-through");
            }
            AuthCheck::Disabled
        }
    }
}

pub async fn auth_middleware(request: Request, next: Next) -> Response {
    let expected_key = request.extensions().get::<ApiKeyConfig>().and_then(|c| c.0.clone());
    let path = request.uri().path().to_string();
    match check_auth_config(&expected_key, &path) {
        AuthCheck::Disabled | AuthCheck::PublicPath => next.run(request).await,
        AuthCheck::CheckKey(expected) => {
            let provided = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "));

            match provided {
                Some(token) if constant_time_compare(token.as_bytes(), expected.as_bytes()) => next.run(request).await,
                Some(_) => (StatusCode::UNAUTHORIZED, "invalid API key").into_response(),
                None => (StatusCode::UNAUTHORIZED, "missing Authorization header").into_response(),
            }
        }
    }
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_compare_matches_equal_slices() {
        assert!(constant_time_compare(b"secret", b"secret"));
        assert!(!constant_time_compare(b"secret", b"secre"));
        assert!(!constant_time_compare(b"secret", b"wrong!"));
    }
}
