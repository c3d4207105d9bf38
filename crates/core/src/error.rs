//! Error taxonomy shared by every crate in the workspace.
//!
//! Each variant corresponds to one row of the error taxonomy: a stable
//! `code()` is exposed so the HTTP layer and logs never depend on Rust's
//! own type names leaking out as an API contract.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Blueprint fails publish-time checks, or rule parameters are invalid.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Mapping or persistence of compiled artifacts failed.
    #[error("compilation failed: {0}")]
    Compilation(String),

    /// Preconditions not met: unpublished blueprint, tenant mismatch, duplicate evaluation.
    #[error("precondition not met: {0}")]
    Precondition(String),

    /// ASR provider failed or timed out.
    #[error("transcription failed: {0}")]
    Transcription(String),

    /// Embedding provider fallback engaged; not fatal, recorded for observability.
    #[error("detection warning: {0}")]
    DetectionWarning(String),

    /// LLM provider response failed schema validation; triggers per-stage fallback.
    #[error("llm response failed validation: {0}")]
    LlmValidation(String),

    /// Uncaught fault. Truncated before being stored alongside a failed evaluation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationError",
            Error::Compilation(_) => "CompilationError",
            Error::Precondition(_) => "PreconditionError",
            Error::Transcription(_) => "TranscriptionError",
            Error::DetectionWarning(_) => "DetectionWarning",
            Error::LlmValidation(_) => "LLMValidationError",
            Error::Internal(_) => "InternalError",
        }
    }

    /// Truncates the message to a bounded length before it is persisted,
    /// per the error-handling design's "message truncated and stored" rule.
    pub fn truncated_message(&self, max_len: usize) -> String {
        let msg = self.to_string();
        if msg.len() <= max_len {
            msg
        } else {
            let mut truncated = msg[..max_len].to_string();
            truncated.push_str("...");
            truncated
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn compilation(msg: impl Into<String>) -> Self {
        Error::Compilation(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::validation("x").code(), "ValidationError");
        assert_eq!(Error::internal("x").code(), "InternalError");
    }

    #[test]
    fn truncation_respects_max_len() {
        let err = Error::internal("a".repeat(500));
        let msg = err.truncated_message(50);
        assert!(msg.len() <= 53);
        assert!(msg.ends_with("..."));
    }
}
