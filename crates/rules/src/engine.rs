//! Evaluates compiled compliance rules. Pure with respect to its inputs:
//! no I/O, no shared state, same inputs always produce the same outcomes.

use qa_core::compiled::TimingReference;
use qa_core::ids::{CompiledRuleId, CompiledStepId, StageId};
use qa_core::{CompiledComplianceRule, RuleType, Severity, Transcript};
use regex::RegexBuilder;
use serde::Serialize;
use std::collections::HashMap;

/// A behavior detection result as seen by the rule engine; decoupled from
/// `qa-detection`'s own type so this crate stays dependency-free of it.
#[derive(Debug, Clone)]
pub struct DetectedStep {
    pub step_id: CompiledStepId,
    pub stage_id: StageId,
    pub detected: bool,
    pub start: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleOutcome {
    pub rule_id: CompiledRuleId,
    pub passed: bool,
    pub severity: Severity,
    pub evidence: Vec<String>,
    pub action_on_fail: Option<qa_core::CriticalAction>,
}

pub struct RuleEngine {
    case_sensitive: bool,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(false)
    }
}

impl RuleEngine {
    pub fn new(case_sensitive: bool) -> Self {
        Self { case_sensitive }
    }

    pub fn evaluate(
        &self,
        rules: &[CompiledComplianceRule],
        transcript: &Transcript,
        detections: &[DetectedStep],
    ) -> Vec<RuleOutcome> {
        self.evaluate_with_reference_times(rules, transcript, detections, &HashMap::new())
    }

    /// Same as [`Self::evaluate`], but `reference_times` resolves each
    /// `timing_rule(reference = previous_step)`'s reference instant — the
    /// rule engine has no notion of step ordering on its own, so the
    /// caller (which does, via the compiled flow's step list) supplies it
    /// per rule id. Rules absent from the map fall back to `call_start`
    /// semantics (reference instant 0.0).
    pub fn evaluate_with_reference_times(
        &self,
        rules: &[CompiledComplianceRule],
        transcript: &Transcript,
        detections: &[DetectedStep],
        reference_times: &HashMap<CompiledRuleId, f64>,
    ) -> Vec<RuleOutcome> {
        let detected_by_step: HashMap<CompiledStepId, &DetectedStep> =
            detections.iter().map(|d| (d.step_id, d)).collect();

        rules
            .iter()
            .filter(|r| r.active)
            .map(|rule| self.evaluate_one(rule, transcript, &detected_by_step, reference_times))
            .collect()
    }

    fn evaluate_one(
        &self,
        rule: &CompiledComplianceRule,
        transcript: &Transcript,
        detected_by_step: &HashMap<CompiledStepId, &DetectedStep>,
        reference_times: &HashMap<CompiledRuleId, f64>,
    ) -> RuleOutcome {
        let (passed, evidence) = match rule.rule_type {
            RuleType::RequiredPhrase => self.evaluate_phrase_rule(rule, transcript, true),
            RuleType::ForbiddenPhrase => self.evaluate_phrase_rule(rule, transcript, false),
            RuleType::RequiredStep => {
                let detected = detected_by_step.get(&rule.target).map(|d| d.detected).unwrap_or(false);
                (detected, Vec::new())
            }
            RuleType::SequenceRule => self.evaluate_sequence_rule(rule, detected_by_step),
            RuleType::TimingRule => self.evaluate_timing_rule(rule, detected_by_step, reference_times.get(&rule.id).copied()),
            RuleType::VerificationRule => self.evaluate_verification_rule(rule, transcript, detected_by_step),
            RuleType::ConditionalRule => self.evaluate_conditional_rule(rule, transcript, detected_by_step),
        };

        RuleOutcome {
            rule_id: rule.id,
            passed,
            severity: rule.severity,
            evidence,
            action_on_fail: rule.action_on_fail,
        }
    }

    /// `required_phrase`/`forbidden_phrase`: `passed` means the rule's
    /// intent was honored — phrase present for required, absent for
    /// forbidden.
    fn evaluate_phrase_rule(&self, rule: &CompiledComplianceRule, transcript: &Transcript, required: bool) -> (bool, Vec<String>) {
        let Some(phrases) = &rule.phrases else {
            return (required, Vec::new());
        };
        let mut evidence = Vec::new();
        let mut any_found = false;

        for segment in &transcript.diarized_segments {
            if self.segment_matches(&segment.text, phrases, rule.match_mode) {
                any_found = true;
                evidence.push(format!("{:.1}s: {}", segment.start_s, segment.text));
                if !required {
                    break;
                }
            }
        }

        (any_found == required, evidence)
    }

    fn segment_matches(&self, text: &str, phrases: &[String], match_mode: Option<qa_core::MatchMode>) -> bool {
        use qa_core::MatchMode::*;
        let haystack = if self.case_sensitive { text.to_string() } else { text.to_lowercase() };

        phrases.iter().any(|phrase| {
            let needle = if self.case_sensitive { phrase.clone() } else { phrase.to_lowercase() };
            match match_mode.unwrap_or(Contains) {
                Exact => haystack.trim() == needle.trim(),
                Contains | Semantic | Hybrid => haystack.contains(&needle),
                Regex => RegexBuilder::new(phrase)
                    .case_insensitive(!self.case_sensitive)
                    .build()
                    .map(|re| re.is_match(text))
                    .unwrap_or(false),
            }
        })
    }

    fn evaluate_sequence_rule(&self, rule: &CompiledComplianceRule, detected_by_step: &HashMap<CompiledStepId, &DetectedStep>) -> (bool, Vec<String>) {
        let Some(params) = &rule.params else {
            return (false, vec!["sequence_rule missing params".into()]);
        };
        let before = params.get("before_step").and_then(|v| v.as_str()).and_then(|s| s.parse().ok());
        let after = params.get("after_step").and_then(|v| v.as_str()).and_then(|s| s.parse().ok());
        let allow_ties = params.get("allow_ties").and_then(|v| v.as_bool()).unwrap_or(false);

        let (Some(before_id), Some(after_id)) = (before, after) else {
            return (false, vec!["sequence_rule has malformed step references".into()]);
        };

        let before_step = detected_by_step.get(&qa_core::ids::CompiledStepId::from_uuid(before_id));
        let after_step = detected_by_step.get(&qa_core::ids::CompiledStepId::from_uuid(after_id));

        match (before_step, after_step) {
            (Some(b), Some(a)) if b.detected && a.detected => match (b.start, a.start) {
                (Some(bs), Some(as_)) => {
                    let ok = if allow_ties { bs <= as_ } else { bs < as_ };
                    (ok, vec![format!("before={bs:.1}s after={as_:.1}s")])
                }
                _ => (false, vec!["missing timestamps for sequence check".into()]),
            },
            _ => (false, vec!["one or both sequenced steps not detected".into()]),
        }
    }

    fn evaluate_timing_rule(
        &self,
        rule: &CompiledComplianceRule,
        detected_by_step: &HashMap<CompiledStepId, &DetectedStep>,
        resolved_previous_step_time: Option<f64>,
    ) -> (bool, Vec<String>) {
        let Some(constraints) = &rule.timing_constraints else {
            return (false, vec!["timing_rule missing constraints".into()]);
        };
        let Some(target) = detected_by_step.get(&rule.target) else {
            return (false, vec!["target step not found".into()]);
        };
        if !target.detected {
            return (false, vec!["target step not detected".into()]);
        }
        let Some(target_time) = target.start else {
            return (false, vec!["target step has no timestamp".into()]);
        };

        let reference_time = match constraints.reference {
            TimingReference::CallStart => 0.0,
            TimingReference::PreviousStep => resolved_previous_step_time.unwrap_or(0.0),
        };

        let elapsed = target_time - reference_time;
        let ok = elapsed.abs() <= constraints.within_seconds;
        (ok, vec![format!("elapsed={elapsed:.1}s limit={:.1}s", constraints.within_seconds)])
    }

    /// `verification_rule`: counts questions asked only within the window
    /// opened by `rule.target` (the verification step, e.g. "confirm
    /// identity") and closed by `must_complete_before_step_id`'s detected
    /// start — not every `?`-ending segment in the whole call. A rule
    /// whose verification step never fired has nothing to scope against
    /// and fails outright.
    fn evaluate_verification_rule(
        &self,
        rule: &CompiledComplianceRule,
        transcript: &Transcript,
        detected_by_step: &HashMap<CompiledStepId, &DetectedStep>,
    ) -> (bool, Vec<String>) {
        let Some(params) = &rule.params else {
            return (false, vec!["verification_rule missing params".into()]);
        };
        let required_count = params.get("required_question_count").and_then(|v| v.as_u64()).unwrap_or(1) as usize;

        let Some(verification_step) = detected_by_step.get(&rule.target) else {
            return (false, vec!["verification_step not found among detected steps".into()]);
        };
        if !verification_step.detected {
            return (false, vec!["verification_step not detected".into()]);
        }
        let window_start = verification_step.start.unwrap_or(0.0);

        let cutoff_step = params
            .get("must_complete_before_step_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .map(qa_core::ids::CompiledStepId::from_uuid)
            .and_then(|id| detected_by_step.get(&id).copied());

        let before_time = cutoff_step
            .and_then(|d| d.start)
            .or_else(|| params.get("must_complete_before_step_time").and_then(|v| v.as_f64()))
            .unwrap_or(f64::INFINITY);

        let question_count = transcript
            .diarized_segments
            .iter()
            .filter(|s| s.start_s >= window_start && s.start_s < before_time && s.text.trim_end().ends_with('?'))
            .count();

        (
            question_count >= required_count,
            vec![format!("questions_asked={question_count} required={required_count} window=[{window_start:.1}s,{before_time:.1}s)")],
        )
    }

    fn evaluate_conditional_rule(
        &self,
        rule: &CompiledComplianceRule,
        transcript: &Transcript,
        detected_by_step: &HashMap<CompiledStepId, &DetectedStep>,
    ) -> (bool, Vec<String>) {
        let Some(params) = &rule.params else {
            return (false, vec!["conditional_rule missing params".into()]);
        };

        let condition_met = self.evaluate_condition(params.get("condition"), transcript);
        if !condition_met {
            // Condition didn't trigger: the rule's assertions don't apply, so it passes vacuously.
            return (true, vec!["condition not triggered".into()]);
        }

        let required_actions: Vec<CompiledStepId> = params
            .get("required_actions")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| s.parse().ok())
                    .map(qa_core::ids::CompiledStepId::from_uuid)
                    .collect()
            })
            .unwrap_or_default();

        let all_detected = required_actions.iter().all(|id| detected_by_step.get(id).map(|d| d.detected).unwrap_or(false));
        (all_detected, vec![format!("condition triggered, {}/{} required actions detected", required_actions.iter().filter(|id| detected_by_step.get(*id).map(|d| d.detected).unwrap_or(false)).count(), required_actions.len())])
    }

    fn evaluate_condition(&self, condition: Option<&serde_json::Value>, transcript: &Transcript) -> bool {
        let Some(condition) = condition else {
            return false;
        };
        if let Some(phrase) = condition.get("phrase_mention").and_then(|v| v.as_str()) {
            return transcript.diarized_segments.iter().any(|s| s.text.to_lowercase().contains(&phrase.to_lowercase()));
        }
        if let Some(threshold) = condition.get("sentiment_below").and_then(|v| v.as_f64()) {
            return transcript.sentiment_analysis.iter().any(|s| s.score < threshold);
        }
        if let Some(flag) = condition.get("metadata_flag").and_then(|v| v.as_bool()) {
            return flag;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qa_core::ids::{CompiledFlowVersionId, CompiledRuleId, CompiledStepId, RecordingId, StageId};
    use qa_core::{DiarizedSegment, Speaker};

    fn sample_transcript() -> Transcript {
        Transcript {
            recording_id: RecordingId::new(),
            transcript_text: String::new(),
            diarized_segments: vec![DiarizedSegment {
                speaker: Speaker::Agent,
                text: "Thank you for calling, how can I help?".into(),
                start_s: 0.0,
                end_s: 3.0,
                confidence: 0.9,
            }],
            sentiment_analysis: Vec::new(),
            confidence: 1.0,
        }
    }

    fn phrase_rule(rule_type: RuleType, phrases: Vec<String>) -> CompiledComplianceRule {
        let step_id = CompiledStepId::new();
        CompiledComplianceRule {
            id: CompiledRuleId::new(),
            flow_version_id: CompiledFlowVersionId::new(),
            flow_step_id: step_id,
            rule_type,
            target: step_id,
            source_behavior_type: qa_core::BehaviorType::Required,
            phrases: Some(phrases),
            match_mode: Some(qa_core::MatchMode::Contains),
            severity: Severity::Major,
            action_on_fail: None,
            timing_constraints: None,
            active: true,
            params: None,
        }
    }

    #[test]
    fn required_phrase_present_passes() {
        let engine = RuleEngine::default();
        let rule = phrase_rule(RuleType::RequiredPhrase, vec!["thank you for calling".into()]);
        let outcomes = engine.evaluate(&[rule], &sample_transcript(), &[]);
        assert!(outcomes[0].passed);
    }

    #[test]
    fn forbidden_phrase_present_fails() {
        let engine = RuleEngine::default();
        let rule = phrase_rule(RuleType::ForbiddenPhrase, vec!["thank you for calling".into()]);
        let outcomes = engine.evaluate(&[rule], &sample_transcript(), &[]);
        assert!(!outcomes[0].passed);
    }

    #[test]
    fn required_step_uses_detection_output() {
        let step_id = CompiledStepId::new();
        let stage_id = StageId::new();
        let mut rule = phrase_rule(RuleType::RequiredStep, vec![]);
        rule.target = step_id;
        let detections = vec![DetectedStep { step_id, stage_id, detected: true, start: Some(1.0) }];
        let engine = RuleEngine::default();
        let outcomes = engine.evaluate(&[rule], &sample_transcript(), &detections);
        assert!(outcomes[0].passed);
    }

    #[test]
    fn timing_rule_previous_step_uses_resolved_reference_time() {
        let step_id = CompiledStepId::new();
        let stage_id = StageId::new();
        let mut rule = phrase_rule(RuleType::TimingRule, vec![]);
        rule.target = step_id;
        rule.timing_constraints = Some(qa_core::TimingConstraints {
            within_seconds: 5.0,
            reference: TimingReference::PreviousStep,
            scope_stage: None,
        });
        let detections = vec![DetectedStep { step_id, stage_id, detected: true, start: Some(12.0) }];
        let mut reference_times = HashMap::new();
        reference_times.insert(rule.id, 10.0);

        let engine = RuleEngine::default();
        let outcomes = engine.evaluate_with_reference_times(&[rule], &sample_transcript(), &detections, &reference_times);
        assert!(outcomes[0].passed);
    }

    #[test]
    fn conditional_rule_passes_vacuously_when_not_triggered() {
        let mut rule = phrase_rule(RuleType::ConditionalRule, vec![]);
        rule.params = Some(serde_json::json!({"condition": {"phrase_mention": "refund"}, "required_actions": []}));
        let engine = RuleEngine::default();
        let outcomes = engine.evaluate(&[rule], &sample_transcript(), &[]);
        assert!(outcomes[0].passed);
    }

    fn verification_transcript() -> Transcript {
        Transcript {
            recording_id: RecordingId::new(),
            transcript_text: String::new(),
            diarized_segments: vec![
                DiarizedSegment {
                    speaker: Speaker::Agent,
                    text: "What's your account number?".into(),
                    start_s: 1.0,
                    end_s: 3.0,
                    confidence: 0.9,
                },
                DiarizedSegment {
                    speaker: Speaker::Agent,
                    text: "Can you confirm your date of birth?".into(),
                    start_s: 4.0,
                    end_s: 6.0,
                    confidence: 0.9,
                },
                // Outside the verification window, after the cutoff step.
                DiarizedSegment {
                    speaker: Speaker::Agent,
                    text: "Is there anything else I can help with?".into(),
                    start_s: 20.0,
                    end_s: 22.0,
                    confidence: 0.9,
                },
            ],
            sentiment_analysis: Vec::new(),
            confidence: 1.0,
        }
    }

    #[test]
    fn verification_rule_only_counts_questions_inside_step_window() {
        let verification_step = CompiledStepId::new();
        let cutoff_step = CompiledStepId::new();
        let stage_id = StageId::new();
        let mut rule = phrase_rule(RuleType::VerificationRule, vec![]);
        rule.target = verification_step;
        rule.params = Some(serde_json::json!({
            "required_question_count": 2,
            "must_complete_before_step_id": cutoff_step.as_uuid().to_string(),
        }));

        let detections = vec![
            DetectedStep { step_id: verification_step, stage_id, detected: true, start: Some(0.5) },
            DetectedStep { step_id: cutoff_step, stage_id, detected: true, start: Some(10.0) },
        ];

        let engine = RuleEngine::default();
        let outcomes = engine.evaluate(&[rule], &verification_transcript(), &detections);
        assert!(outcomes[0].passed);
    }

    #[test]
    fn verification_rule_fails_when_step_never_detected() {
        let verification_step = CompiledStepId::new();
        let mut rule = phrase_rule(RuleType::VerificationRule, vec![]);
        rule.target = verification_step;
        rule.params = Some(serde_json::json!({"required_question_count": 1}));

        let engine = RuleEngine::default();
        let outcomes = engine.evaluate(&[rule], &verification_transcript(), &[]);
        assert!(!outcomes[0].passed);
    }
}
