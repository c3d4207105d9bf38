use crate::ids::RecordingId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Agent,
    Caller,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiarizedSegment {
    pub speaker: Speaker,
    pub text: String,
    pub start_s: f64,
    pub end_s: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentSample {
    pub start_s: f64,
    pub end_s: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub recording_id: RecordingId,
    pub transcript_text: String,
    pub diarized_segments: Vec<DiarizedSegment>,
    pub sentiment_analysis: Vec<SentimentSample>,
    pub confidence: f64,
}

impl Transcript {
    pub fn duration_s(&self) -> f64 {
        self.diarized_segments
            .iter()
            .map(|s| s.end_s)
            .fold(0.0_f64, f64::max)
    }

    pub fn agent_segments(&self) -> impl Iterator<Item = &DiarizedSegment> {
        self.diarized_segments.iter().filter(|s| s.speaker == Speaker::Agent)
    }
}
