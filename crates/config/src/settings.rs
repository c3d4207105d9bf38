use crate::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_s: [u64; 3],
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_s: [1, 3, 10],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StageTimeouts {
    pub asr_s: u64,
    pub alignment_s: u64,
    pub llm_s: u64,
    pub embedding_s: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            asr_s: 30,
            alignment_s: 120,
            llm_s: 60,
            embedding_s: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Cosine-similarity threshold above which a semantic match counts as detected.
    pub semantic_detection_threshold: f64,
    /// Stage confidence below this threshold routes the evaluation to human review.
    pub low_confidence_threshold: f64,
    pub worker_pool_size: usize,
    pub timeouts: StageTimeouts,
    pub retry_policy: RetryPolicy,
    /// Transcript Normalizer's max call duration before trimming (seconds).
    pub max_call_duration_s: f64,
    /// Seconds kept at each end of a trimmed transcript.
    pub keep_segments_s: f64,
    /// Same-speaker merge gap tolerance (seconds).
    pub merge_gap_s: f64,
    /// Seconds kept either side of a real rule-hit/detection event timestamp
    /// when trimming a long call, on top of the head/tail `keep_segments_s`.
    pub rule_event_buffer_s: f64,
    pub pii_redaction_enabled: bool,
    /// Discretionary scoring cap used by the LLM fallback penalty table.
    pub discretionary_cap: f64,
    /// A category within this many points of the overall score counts as
    /// "near" a pass/fail boundary for the human-review heuristic.
    pub pass_threshold_band: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            semantic_detection_threshold: 0.72,
            low_confidence_threshold: 0.5,
            worker_pool_size: 8,
            timeouts: StageTimeouts::default(),
            retry_policy: RetryPolicy::default(),
            max_call_duration_s: 1200.0,
            keep_segments_s: 30.0,
            merge_gap_s: 1.5,
            rule_event_buffer_s: 30.0,
            pii_redaction_enabled: true,
            discretionary_cap: 10.0,
            pass_threshold_band: 5.0,
        }
    }
}

impl Settings {
    /// Loads settings from an optional base file, then layers `QA_`-prefixed
    /// environment variables on top (e.g. `QA_WORKER_POOL_SIZE=16`).
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let mut builder = config::Config::builder()
            .set_default("semantic_detection_threshold", defaults.semantic_detection_threshold)?
            .set_default("low_confidence_threshold", defaults.low_confidence_threshold)?
            .set_default("worker_pool_size", defaults.worker_pool_size as i64)?
            .set_default("timeouts.asr_s", defaults.timeouts.asr_s as i64)?
            .set_default("timeouts.alignment_s", defaults.timeouts.alignment_s as i64)?
            .set_default("timeouts.llm_s", defaults.timeouts.llm_s as i64)?
            .set_default("timeouts.embedding_s", defaults.timeouts.embedding_s as i64)?
            .set_default("retry_policy.max_attempts", defaults.retry_policy.max_attempts as i64)?
            .set_default("max_call_duration_s", defaults.max_call_duration_s)?
            .set_default("keep_segments_s", defaults.keep_segments_s)?
            .set_default("merge_gap_s", defaults.merge_gap_s)?
            .set_default("rule_event_buffer_s", defaults.rule_event_buffer_s)?
            .set_default("pii_redaction_enabled", defaults.pii_redaction_enabled)?
            .set_default("discretionary_cap", defaults.discretionary_cap)?
            .set_default("pass_threshold_band", defaults.pass_threshold_band)?;

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("QA").separator("__"));

        let raw = builder.build()?;
        // retry_policy.backoff_s has no natural scalar default; keep the
        // compiled-in schedule unless the file/env overrides the whole array.
        let backoff_s = raw
            .get::<[u64; 3]>("retry_policy.backoff_s")
            .unwrap_or(defaults.retry_policy.backoff_s);

        Ok(Settings {
            semantic_detection_threshold: raw.get("semantic_detection_threshold")?,
            low_confidence_threshold: raw.get("low_confidence_threshold")?,
            worker_pool_size: raw.get::<i64>("worker_pool_size")? as usize,
            timeouts: StageTimeouts {
                asr_s: raw.get::<i64>("timeouts.asr_s")? as u64,
                alignment_s: raw.get::<i64>("timeouts.alignment_s")? as u64,
                llm_s: raw.get::<i64>("timeouts.llm_s")? as u64,
                embedding_s: raw.get::<i64>("timeouts.embedding_s")? as u64,
            },
            retry_policy: RetryPolicy {
                max_attempts: raw.get::<i64>("retry_policy.max_attempts")? as u32,
                backoff_s,
            },
            max_call_duration_s: raw.get("max_call_duration_s")?,
            keep_segments_s: raw.get("keep_segments_s")?,
            merge_gap_s: raw.get("merge_gap_s")?,
            rule_event_buffer_s: raw.get("rule_event_buffer_s")?,
            pii_redaction_enabled: raw.get("pii_redaction_enabled")?,
            discretionary_cap: raw.get("discretionary_cap")?,
            pass_threshold_band: raw.get("pass_threshold_band")?,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }
}
