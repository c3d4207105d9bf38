//! Processing tracer: an in-memory ledger of named checkpoints reached
//! while a single evaluation runs, surfaced as part of the Evaluation's
//! metadata for observability without becoming a queryable API of its own.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TraceCheckpoint {
    pub name: String,
    pub at: DateTime<Utc>,
    pub elapsed_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingTrace {
    checkpoints: Vec<TraceCheckpoint>,
    #[serde(skip)]
    started_at: Option<DateTime<Utc>>,
}

impl ProcessingTrace {
    pub fn new() -> Self {
        Self { checkpoints: Vec::new(), started_at: Some(Utc::now()) }
    }

    pub fn mark(&mut self, name: impl Into<String>) {
        let now = Utc::now();
        let started_at = *self.started_at.get_or_insert(now);
        self.checkpoints.push(TraceCheckpoint {
            name: name.into(),
            at: now,
            elapsed_ms: (now - started_at).num_milliseconds(),
        });
    }

    pub fn checkpoints(&self) -> &[TraceCheckpoint] {
        &self.checkpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoints_accumulate_in_order() {
        let mut trace = ProcessingTrace::new();
        trace.mark("transcript_ready");
        trace.mark("detection_done");
        let names: Vec<&str> = trace.checkpoints().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["transcript_ready", "detection_done"]);
    }

    #[test]
    fn elapsed_is_monotonically_non_decreasing() {
        let mut trace = ProcessingTrace::new();
        trace.mark("a");
        trace.mark("b");
        let elapsed: Vec<i64> = trace.checkpoints().iter().map(|c| c.elapsed_ms).collect();
        assert!(elapsed[1] >= elapsed[0]);
    }
}
