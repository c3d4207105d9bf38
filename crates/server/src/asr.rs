//! ASR provider adapter for a submit-then-poll transcription API (the
//! AssemblyAI-shaped contract this system was built against): submit the
//! recording's audio URL with speaker labels on, then poll until the job
//! reaches a terminal state.

use async_trait::async_trait;
use qa_core::error::{Error, Result};
use qa_core::traits::{AsrProvider, AsrResult};
use qa_core::{DiarizedSegment, Speaker};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self { base_url: "https://api.assemblyai.com/v2".to_string(), api_key: None, poll_interval: Duration::from_secs(2), max_polls: 150 }
    }
}

pub struct HttpAsrProvider {
    client: reqwest::Client,
    config: AsrConfig,
}

impl HttpAsrProvider {
    pub fn new(config: AsrConfig) -> Result<Self> {
        let client = reqwest::Client::builder().build().map_err(|e| Error::internal(format!("failed to build asr http client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[derive(serde::Serialize)]
struct SubmitRequest<'a> {
    audio_url: &'a str,
    speaker_labels: bool,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Deserialize)]
struct PollResponse {
    status: String,
    text: Option<String>,
    confidence: Option<f64>,
    utterances: Option<Vec<Utterance>>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct Utterance {
    speaker: String,
    text: String,
    start: f64,
    end: f64,
    #[serde(default)]
    confidence: f64,
}

/// The first speaker label encountered is treated as the agent, matching
/// how this system's recordings always have the agent open the call.
fn resolve_speaker(label: &str, agent_label: &mut Option<String>) -> Speaker {
    match agent_label {
        Some(agent) if agent == label => Speaker::Agent,
        Some(_) => Speaker::Caller,
        None => {
            *agent_label = Some(label.to_string());
            Speaker::Agent
        }
    }
}

#[async_trait]
impl AsrProvider for HttpAsrProvider {
    async fn transcribe(&self, audio_url: &str) -> Result<AsrResult> {
        let Some(api_key) = &self.config.api_key else {
            return Err(Error::Transcription("no ASR api key configured".to_string()));
        };

        let submit: SubmitResponse = self
            .client
            .post(format!("{}/transcript", self.config.base_url))
            .header("authorization", api_key)
            .json(&SubmitRequest { audio_url, speaker_labels: true })
            .send()
            .await
            .map_err(|e| Error::Transcription(format!("asr submit failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Transcription(format!("malformed asr submit response: {e}")))?;

        for _ in 0..self.config.max_polls {
            let poll: PollResponse = self
                .client
                .get(format!("{}/transcript/{}", self.config.base_url, submit.id))
                .header("authorization", api_key)
                .send()
                .await
                .map_err(|e| Error::Transcription(format!("asr poll failed: {e}")))?
                .json()
                .await
                .map_err(|e| Error::Transcription(format!("malformed asr poll response: {e}")))?;

            match poll.status.as_str() {
                "completed" => {
                    let mut agent_label = None;
                    let diarized_segments: Vec<DiarizedSegment> = poll
                        .utterances
                        .unwrap_or_default()
                        .into_iter()
                        .map(|u| DiarizedSegment {
                            speaker: resolve_speaker(&u.speaker, &mut agent_label),
                            text: u.text,
                            start_s: u.start,
                            end_s: u.end,
                            confidence: u.confidence,
                        })
                        .collect();
                    return Ok(AsrResult {
                        transcript_text: poll.text.unwrap_or_default(),
                        diarized_segments,
                        confidence: poll.confidence.unwrap_or(0.0),
                        sentiment: None,
                    });
                }
                "error" => {
                    return Err(Error::Transcription(poll.error.unwrap_or_else(|| "asr job failed with no error detail".to_string())));
                }
                _ => tokio::time::sleep(self.config.poll_interval).await,
            }
        }

        Err(Error::Transcription("asr job did not complete within the poll budget".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_speaker_seen_becomes_agent() {
        let mut agent_label = None;
        assert_eq!(resolve_speaker("A", &mut agent_label), Speaker::Agent);
        assert_eq!(resolve_speaker("B", &mut agent_label), Speaker::Caller);
        assert_eq!(resolve_speaker("A", &mut agent_label), Speaker::Agent);
    }
}
