//! Detection engine orchestrator (C7): locates each compiled step's
//! behavior in the agent's utterances and aggregates per-stage detection
//! scores for the rubric/rule engine.

use crate::embedding::EmbeddingService;
use crate::matcher::match_behavior;
use qa_core::compiled::ExpectedRole;
use qa_core::ids::{CompiledStepId, StageId};
use qa_core::{CompiledFlowStage, CompiledFlowStep, CriticalAction, DiarizedSegment, Speaker, Transcript};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct BehaviorResult {
    pub step_id: CompiledStepId,
    pub stage_id: StageId,
    pub detected: bool,
    pub match_type: Option<&'static str>,
    pub matched_text: Option<String>,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub confidence: f64,
    pub violation: bool,
    pub critical_action: Option<CriticalAction>,
}

#[derive(Debug, Clone)]
pub struct StageAggregate {
    pub stage_id: StageId,
    pub deterministic_score: f64,
    pub detected_start: Option<f64>,
    pub detected_end: Option<f64>,
}

pub struct DetectionEngine {
    semantic_threshold: f64,
}

impl DetectionEngine {
    pub fn new(semantic_threshold: f64) -> Self {
        Self { semantic_threshold }
    }

    /// Runs detection for every compiled step, restricted to utterances
    /// from the step's `expected_role`. Results are returned sorted by
    /// `(stage.ordering_index, step.ordering_index, step_id)` for
    /// determinism, matching the engine's ordering contract.
    pub async fn detect(
        &self,
        transcript: &Transcript,
        stages: &[CompiledFlowStage],
        steps: &[CompiledFlowStep],
        embeddings: &EmbeddingService,
    ) -> (Vec<BehaviorResult>, HashMap<StageId, StageAggregate>) {
        let agent_candidates: Vec<&DiarizedSegment> = transcript.diarized_segments.iter().filter(|s| s.speaker == Speaker::Agent).collect();
        let caller_candidates: Vec<&DiarizedSegment> = transcript.diarized_segments.iter().filter(|s| s.speaker == Speaker::Caller).collect();

        info!(steps = steps.len(), agent_utterances = agent_candidates.len(), "starting detection");

        let mut results = Vec::with_capacity(steps.len());
        for step in steps {
            let candidates = match step.expected_role {
                ExpectedRole::Agent => &agent_candidates,
                ExpectedRole::Caller => &caller_candidates,
            };
            let result = self.detect_one(step, candidates, embeddings).await;
            debug!(step = %step.name, detected = result.detected, confidence = result.confidence, "step detection result");
            results.push(result);
        }

        let stage_order: HashMap<StageId, i32> = stages.iter().map(|s| (s.id, s.ordering_index)).collect();
        let step_order: HashMap<CompiledStepId, i32> = steps.iter().map(|s| (s.id, s.ordering_index)).collect();
        results.sort_by(|a, b| {
            let stage_key = (stage_order.get(&a.stage_id), stage_order.get(&b.stage_id));
            stage_key
                .0
                .cmp(&stage_key.1)
                .then_with(|| step_order.get(&a.step_id).cmp(&step_order.get(&b.step_id)))
                .then_with(|| a.step_id.as_uuid().cmp(&b.step_id.as_uuid()))
        });

        let detected_count = results.iter().filter(|r| r.detected).count();
        info!(detected = detected_count, total = results.len(), "detection summary");

        let stage_aggregates = Self::aggregate_stages(steps, &results);
        (results, stage_aggregates)
    }

    async fn detect_one(&self, step: &CompiledFlowStep, candidates: &[&DiarizedSegment], embeddings: &EmbeddingService) -> BehaviorResult {
        let description = step.description.clone().unwrap_or_else(|| step.name.clone());
        let phrases = step.expected_phrases.as_deref();

        let mut best: Option<(crate::matcher::MatchOutcome, f64, f64)> = None; // (outcome, start, asr_confidence)
        for segment in candidates {
            if segment.text.trim().is_empty() {
                continue;
            }
            if let Some(outcome) = match_behavior(&segment.text, &description, phrases, step.detection_hint, embeddings, self.semantic_threshold).await {
                let better = match &best {
                    None => true,
                    Some((current, current_start, _)) => {
                        (outcome.confidence as f64) > current.confidence as f64
                            || ((outcome.confidence as f64 - current.confidence as f64).abs() < f64::EPSILON && segment.start_s < *current_start)
                    }
                };
                if better {
                    best = Some((outcome, segment.start_s, segment.confidence));
                }
            }
        }

        match best {
            Some((outcome, start, asr_confidence)) => {
                // Blend detector confidence with ASR confidence via a weighted mean.
                let blended = (outcome.confidence as f64 * 0.7 + asr_confidence * 0.3).clamp(0.0, 1.0);
                let violation = matches!(step.behavior_type, qa_core::BehaviorType::Forbidden);
                BehaviorResult {
                    step_id: step.id,
                    stage_id: step.stage_id,
                    detected: true,
                    match_type: Some(match outcome.match_type {
                        crate::matcher::MatchType::Exact => "exact",
                        crate::matcher::MatchType::Semantic => "semantic",
                    }),
                    matched_text: Some(outcome.matched_text),
                    start: Some(start),
                    end: Some(start + 2.0),
                    confidence: blended,
                    violation,
                    critical_action: step.critical_action,
                }
            }
            None => {
                let violation = matches!(step.behavior_type, qa_core::BehaviorType::Required | qa_core::BehaviorType::Critical);
                BehaviorResult {
                    step_id: step.id,
                    stage_id: step.stage_id,
                    detected: false,
                    match_type: None,
                    matched_text: None,
                    start: None,
                    end: None,
                    confidence: 0.0,
                    violation,
                    critical_action: step.critical_action,
                }
            }
        }
    }

    fn aggregate_stages(steps: &[CompiledFlowStep], results: &[BehaviorResult]) -> HashMap<StageId, StageAggregate> {
        let mut by_stage: HashMap<StageId, Vec<&BehaviorResult>> = HashMap::new();
        for result in results {
            by_stage.entry(result.stage_id).or_default().push(result);
        }

        let mut stage_ids: Vec<StageId> = steps.iter().map(|s| s.stage_id).collect();
        stage_ids.dedup();

        stage_ids
            .into_iter()
            .map(|stage_id| {
                let stage_results = by_stage.get(&stage_id).cloned().unwrap_or_default();
                let count = stage_results.len().max(1) as f64;
                let detected = stage_results.iter().filter(|r| r.detected).count() as f64;
                let detected_start = stage_results.iter().filter_map(|r| r.start).fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))));
                let detected_end = stage_results.iter().filter_map(|r| r.end).fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
                (
                    stage_id,
                    StageAggregate {
                        stage_id,
                        deterministic_score: detected / count,
                        detected_start,
                        detected_end,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qa_core::compiled::ExpectedRole;
    use qa_core::ids::{CompiledStepId, StageId};
    use qa_core::{BehaviorType, DetectionMode, RecordingId};

    fn make_step(stage_id: StageId, name: &str, phrases: Vec<String>) -> CompiledFlowStep {
        CompiledFlowStep {
            id: CompiledStepId::new(),
            stage_id,
            source_behavior_id: qa_core::ids::BehaviorId::new(),
            name: name.to_string(),
            description: Some(name.to_string()),
            ordering_index: 0,
            expected_role: ExpectedRole::Agent,
            expected_phrases: Some(phrases),
            detection_hint: DetectionMode::ExactPhrase,
            behavior_type: BehaviorType::Required,
            critical_action: None,
            metadata: Default::default(),
        }
    }

    fn make_stage(stage_id: StageId) -> CompiledFlowStage {
        CompiledFlowStage {
            id: stage_id,
            flow_version_id: qa_core::ids::CompiledFlowVersionId::new(),
            name: "Opening".to_string(),
            ordering_index: 0,
            stage_weight: None,
            expected_duration_hint: None,
            metadata: Default::default(),
        }
    }

    fn make_transcript(segments: Vec<DiarizedSegment>) -> Transcript {
        Transcript {
            recording_id: RecordingId::new(),
            transcript_text: String::new(),
            diarized_segments: segments,
            sentiment_analysis: Vec::new(),
            confidence: 1.0,
        }
    }

    #[tokio::test]
    async fn detects_required_phrase_when_present() {
        let stage_id = StageId::new();
        let step = make_step(stage_id, "greet", vec!["thank you for calling".into()]);
        let transcript = make_transcript(vec![DiarizedSegment {
            speaker: Speaker::Agent,
            text: "Thank you for calling support".into(),
            start_s: 0.0,
            end_s: 3.0,
            confidence: 0.9,
        }]);
        let engine = DetectionEngine::new(0.72);
        let embeddings = EmbeddingService::new();
        let (results, _) = engine.detect(&transcript, &[make_stage(stage_id)], &[step], &embeddings).await;
        assert!(results[0].detected);
        assert_eq!(results[0].match_type, Some("exact"));
    }

    #[tokio::test]
    async fn missing_required_behavior_is_a_violation() {
        let stage_id = StageId::new();
        let step = make_step(stage_id, "greet", vec!["thank you for calling".into()]);
        let transcript = make_transcript(vec![DiarizedSegment {
            speaker: Speaker::Agent,
            text: "Hello there".into(),
            start_s: 0.0,
            end_s: 1.0,
            confidence: 0.9,
        }]);
        let engine = DetectionEngine::new(0.72);
        let embeddings = EmbeddingService::new();
        let (results, _) = engine.detect(&transcript, &[make_stage(stage_id)], &[step], &embeddings).await;
        assert!(!results[0].detected);
        assert!(results[0].violation);
    }

    #[tokio::test]
    async fn determinism_is_stable_across_runs() {
        let stage_id = StageId::new();
        let step = make_step(stage_id, "greet", vec!["thank you for calling".into()]);
        let transcript = make_transcript(vec![DiarizedSegment {
            speaker: Speaker::Agent,
            text: "Thank you for calling support".into(),
            start_s: 0.0,
            end_s: 3.0,
            confidence: 0.9,
        }]);
        let engine = DetectionEngine::new(0.72);
        let embeddings = EmbeddingService::new();
        let stages = [make_stage(stage_id)];
        let (first, _) = engine.detect(&transcript, &stages, &[step.clone()], &embeddings).await;
        let (second, _) = engine.detect(&transcript, &stages, &[step], &embeddings).await;
        assert_eq!(first[0].confidence, second[0].confidence);
        assert_eq!(first[0].detected, second[0].detected);
    }
}
