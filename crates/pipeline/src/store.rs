//! Persistence seam for the evaluation pipeline. There is no real database
//! in this system (see the compiler's transaction comment for the same
//! reasoning); the in-memory store below gives C11 somewhere to upsert
//! `Evaluation` rows and recording status atomically within a process.

use async_trait::async_trait;
use dashmap::DashMap;
use qa_core::error::Result;
use qa_core::ids::RecordingId;
use qa_core::{Evaluation, RecordingStatus, Transcript};

#[async_trait]
pub trait EvaluationStore: Send + Sync {
    async fn get_evaluation(&self, recording_id: RecordingId) -> Result<Option<Evaluation>>;
    async fn get_transcript(&self, recording_id: RecordingId) -> Result<Option<Transcript>>;
    async fn save_transcript(&self, transcript: Transcript) -> Result<()>;
    async fn upsert_pending(&self, evaluation: Evaluation) -> Result<()>;
    async fn upsert_completed(&self, evaluation: Evaluation) -> Result<()>;
    async fn upsert_failed(&self, recording_id: RecordingId, error: String) -> Result<()>;
    async fn recording_status(&self, recording_id: RecordingId) -> Result<Option<RecordingStatus>>;
}

#[derive(Default)]
pub struct InMemoryEvaluationStore {
    evaluations: DashMap<RecordingId, Evaluation>,
    transcripts: DashMap<RecordingId, Transcript>,
    recording_status: DashMap<RecordingId, RecordingStatus>,
}

impl InMemoryEvaluationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvaluationStore for InMemoryEvaluationStore {
    async fn get_evaluation(&self, recording_id: RecordingId) -> Result<Option<Evaluation>> {
        Ok(self.evaluations.get(&recording_id).map(|e| e.clone()))
    }

    async fn get_transcript(&self, recording_id: RecordingId) -> Result<Option<Transcript>> {
        Ok(self.transcripts.get(&recording_id).map(|t| t.clone()))
    }

    async fn save_transcript(&self, transcript: Transcript) -> Result<()> {
        self.transcripts.insert(transcript.recording_id, transcript);
        Ok(())
    }

    async fn upsert_pending(&self, evaluation: Evaluation) -> Result<()> {
        self.recording_status.insert(evaluation.recording_id, RecordingStatus::Processing);
        self.evaluations.insert(evaluation.recording_id, evaluation);
        Ok(())
    }

    async fn upsert_completed(&self, evaluation: Evaluation) -> Result<()> {
        self.recording_status.insert(evaluation.recording_id, RecordingStatus::Completed);
        self.evaluations.insert(evaluation.recording_id, evaluation);
        Ok(())
    }

    async fn upsert_failed(&self, recording_id: RecordingId, error: String) -> Result<()> {
        self.recording_status.insert(recording_id, RecordingStatus::Failed);
        if let Some(mut evaluation) = self.evaluations.get_mut(&recording_id) {
            evaluation.status = qa_core::EvaluationStatus::Failed;
            evaluation.error = Some(error);
        }
        Ok(())
    }

    async fn recording_status(&self, recording_id: RecordingId) -> Result<Option<RecordingStatus>> {
        Ok(self.recording_status.get(&recording_id).map(|s| *s))
    }
}
