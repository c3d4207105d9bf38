use crate::error::Result;
use crate::transcript::{DiarizedSegment, SentimentSample};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct AsrResult {
    pub transcript_text: String,
    pub diarized_segments: Vec<DiarizedSegment>,
    pub confidence: f64,
    pub sentiment: Option<Vec<SentimentSample>>,
}

/// External speech-to-text collaborator. Out of scope to implement for
/// real; callers supply a concrete adapter (HTTP client to the provider).
#[async_trait]
pub trait AsrProvider: Send + Sync {
    async fn transcribe(&self, audio_url: &str) -> Result<AsrResult>;
}
