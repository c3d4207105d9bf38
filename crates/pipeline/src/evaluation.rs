//! Evaluation Pipeline (C11): the orchestrator that turns a recording and
//! a published, compiled flow into a completed `Evaluation`. Every stage
//! below is deliberately a thin call into its owning crate — this module's
//! only job is sequencing, time-window bookkeeping, and envelope assembly.

use crate::normalizer::{role_label, NormalizedTranscript, Normalizer};
use crate::redactor::PiiRedactor;
use crate::store::EvaluationStore;
use crate::trace::ProcessingTrace;
use async_trait::async_trait;
use qa_config::Settings;
use qa_core::compiled::TimingReference;
use qa_core::error::{Error, Result};
use qa_core::ids::{CompiledRuleId, CompiledStepId};
use qa_core::traits::{AsrProvider, LlmProvider};
use qa_core::{
    BehaviorType, BlueprintId, BlueprintStatus, CompiledComplianceRule, CompiledFlowStage,
    CompiledFlowStep, CompiledFlowVersionId, CompiledRubricTemplate, CriticalAction, DeterministicResults,
    Evaluation, EvaluationStatus, FinalEvaluation, LlmStageEvaluations, RecordingId, RuleType, Severity,
    StageId, Transcript,
};
use qa_detection::{BehaviorResult, DetectionEngine, EmbeddingService};
use qa_llm::{GenerationParams, LlmBackend, RuleSignal, StageEvaluation, StageEvaluator};
use qa_rules::{DetectedStep, RuleEngine, RuleOutcome};
use qa_scoring::{RubricScorer, RuleFailure, ScoringInput, StageInput};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Bundles a compiled flow's immutable artifacts for one evaluation run.
/// Borrowed rather than owned — callers (the orchestrator, the sandbox
/// runner) already hold these loaded from the compiler's store.
pub struct CompiledFlowContext<'a> {
    pub flow_version_id: CompiledFlowVersionId,
    pub flow_stages: &'a [CompiledFlowStage],
    pub flow_steps: &'a [CompiledFlowStep],
    pub compliance_rules: &'a [CompiledComplianceRule],
    pub rubric: &'a CompiledRubricTemplate,
}

pub struct EvaluationRequest<'a> {
    pub recording_id: RecordingId,
    pub recording_company_id: String,
    pub blueprint_id: BlueprintId,
    pub blueprint_company_id: String,
    pub blueprint_status: BlueprintStatus,
    pub flow: CompiledFlowContext<'a>,
    pub audio_url: Option<String>,
    /// Pre-existing transcript, if one was already produced (e.g. a sandbox
    /// run reusing a recording's transcript). When absent, ASR runs.
    pub transcript: Option<Transcript>,
}

/// Always-failing backend used when a run has no LLM provider configured.
/// `generate_with_retry` treats its error as retryable but `max_attempts`
/// is pinned to 1 for this backend, so the fallback engages immediately
/// without wasted retry sleeps.
struct NullLlmBackend;

#[async_trait]
impl LlmBackend for NullLlmBackend {
    async fn generate(&self, _prompt: &str, _schema: &serde_json::Value, _params: &GenerationParams) -> Result<serde_json::Value> {
        Err(Error::internal("no llm backend configured for this run"))
    }

    fn is_available(&self) -> bool {
        false
    }

    fn model_name(&self) -> &str {
        "none"
    }
}

#[derive(Serialize)]
struct ViolationRecord<'a> {
    rule_id: CompiledRuleId,
    severity: Severity,
    evidence: &'a [String],
    action_on_fail: Option<CriticalAction>,
}

#[derive(Serialize)]
struct StageSummary {
    stage_id: StageId,
    stage_name: String,
    stage_score: f64,
    stage_confidence: f64,
    critical_violation: bool,
    used_fallback: bool,
}

/// The scored output of C11 steps 3 through 6, with no recording or
/// blueprint identity attached. `run_for_recording` wraps this into an
/// `Evaluation`; the sandbox runner wraps it into a `SandboxResult` instead.
pub struct CoreRunOutput {
    pub deterministic_results: DeterministicResults,
    pub llm_stage_evaluations: LlmStageEvaluations,
    pub overall_score: f64,
    pub overall_passed: bool,
    pub requires_human_review: bool,
    pub confidence_score: f64,
    pub final_evaluation: FinalEvaluation,
}

pub struct EvaluationPipeline {
    settings: Settings,
    detection_engine: DetectionEngine,
    embeddings: EmbeddingService,
    rule_engine: RuleEngine,
    asr: Arc<dyn AsrProvider>,
    llm_backend: Option<Arc<dyn LlmBackend>>,
    store: Arc<dyn EvaluationStore>,
}

impl EvaluationPipeline {
    pub fn new(
        settings: Settings,
        asr: Arc<dyn AsrProvider>,
        llm_backend: Option<Arc<dyn LlmBackend>>,
        embedding_provider: Option<Arc<dyn LlmProvider>>,
        store: Arc<dyn EvaluationStore>,
    ) -> Self {
        let detection_engine = DetectionEngine::new(settings.semantic_detection_threshold);
        let embeddings = match embedding_provider {
            Some(provider) => EmbeddingService::with_provider(provider),
            None => EmbeddingService::new(),
        };
        Self { settings, detection_engine, embeddings, rule_engine: RuleEngine::default(), asr, llm_backend, store }
    }

    /// Runs the full pipeline for one recording: preconditions, transcript
    /// acquisition, detection, rules, per-stage LLM judgment, scoring, and
    /// persistence. Never leaves the recording `pending` on any error path
    /// — a failure always lands in `upsert_failed` before being returned.
    pub async fn run_for_recording(&self, request: EvaluationRequest<'_>) -> Result<Evaluation> {
        if request.recording_company_id != request.blueprint_company_id {
            return Err(Error::precondition("recording and blueprint belong to different companies"));
        }
        if request.blueprint_status != BlueprintStatus::Published {
            return Err(Error::precondition("blueprint is not published"));
        }
        if let Some(existing) = self.store.get_evaluation(request.recording_id).await? {
            if existing.status.is_terminal() {
                return Ok(existing);
            }
            return Err(Error::precondition("an evaluation is already in progress for this recording"));
        }

        let pending = Evaluation::pending(request.recording_id, request.blueprint_id, request.flow.flow_version_id);
        self.store.upsert_pending(pending.clone()).await?;

        let recording_id = request.recording_id;
        let mut trace = ProcessingTrace::new();
        match self.run_inner(request, &mut trace).await {
            Ok(mut evaluation) => {
                evaluation.id = pending.id;
                self.store.upsert_completed(evaluation.clone()).await?;
                Ok(evaluation)
            }
            Err(err) => {
                self.store.upsert_failed(recording_id, err.truncated_message(500)).await?;
                Err(err)
            }
        }
    }

    async fn run_inner(&self, request: EvaluationRequest<'_>, trace: &mut ProcessingTrace) -> Result<Evaluation> {
        let raw_transcript = self.ensure_transcript(request.recording_id, request.audio_url.as_deref(), request.transcript).await?;
        trace.mark("transcript_ready");

        let core = self.evaluate_core(&raw_transcript, &request.flow, trace).await;

        let mut evaluation = Evaluation::pending(request.recording_id, request.blueprint_id, request.flow.flow_version_id);
        evaluation.status = EvaluationStatus::Completed;
        evaluation.overall_score = core.overall_score;
        evaluation.overall_passed = core.overall_passed;
        evaluation.requires_human_review = core.requires_human_review;
        evaluation.confidence_score = core.confidence_score;
        evaluation.deterministic_results = Some(core.deterministic_results);
        evaluation.llm_stage_evaluations = Some(core.llm_stage_evaluations);
        evaluation.final_evaluation = Some(core.final_evaluation);

        Ok(evaluation)
    }

    /// Runs C11 steps 3 through 6 — detection, deterministic rules,
    /// per-stage LLM judgment, and scoring — against an already-acquired
    /// transcript. Shared by the persisted recording-evaluation path and
    /// the sandbox runner, which never writes an `Evaluation` row.
    pub async fn evaluate_core(&self, raw_transcript: &Transcript, flow: &CompiledFlowContext<'_>, trace: &mut ProcessingTrace) -> CoreRunOutput {
        let normalizer = Normalizer::new(self.settings.merge_gap_s, self.settings.max_call_duration_s, self.settings.keep_segments_s);
        let cleaned = normalizer.normalize(&raw_transcript.diarized_segments);
        trace.mark("normalized");

        let normalized_transcript = Transcript {
            recording_id: raw_transcript.recording_id,
            transcript_text: cleaned.text.clone(),
            diarized_segments: cleaned.segments.clone(),
            sentiment_analysis: raw_transcript.sentiment_analysis.clone(),
            confidence: raw_transcript.confidence,
        };
        let working_transcript = if self.settings.pii_redaction_enabled {
            PiiRedactor::redact_transcript(&normalized_transcript)
        } else {
            normalized_transcript
        };
        trace.mark("redacted");

        // Detection and rule evaluation both run on the full, untrimmed
        // transcript: trimming before either would risk silently dropping
        // the very evidence they're about to produce. Only once their real
        // event timestamps exist does a long call get trimmed around them.
        let (behavior_results, _stage_aggregates) = self.detection_engine.detect(&working_transcript, flow.flow_stages, flow.flow_steps, &self.embeddings).await;
        trace.mark("detected");

        let detections: Vec<DetectedStep> = behavior_results
            .iter()
            .map(|r| DetectedStep { step_id: r.step_id, stage_id: r.stage_id, detected: r.detected, start: r.start })
            .collect();
        let reference_times = Self::resolve_previous_step_times(flow, &behavior_results);
        let rule_outcomes =
            self.rule_engine.evaluate_with_reference_times(flow.compliance_rules, &working_transcript, &detections, &reference_times);
        trace.mark("rules_evaluated");

        let evidence_ranges = Self::evidence_ranges_from_detections(&behavior_results, self.settings.rule_event_buffer_s);
        let post_redaction = NormalizedTranscript {
            text: working_transcript.transcript_text.clone(),
            segments: working_transcript.diarized_segments.clone(),
            audit: cleaned.audit,
            metadata: cleaned.metadata,
        };
        let trimmed = normalizer.trim(&post_redaction, &evidence_ranges);
        trace.mark("trimmed");
        let scored_transcript = Transcript {
            recording_id: working_transcript.recording_id,
            transcript_text: trimmed.text,
            diarized_segments: trimmed.segments,
            sentiment_analysis: working_transcript.sentiment_analysis.clone(),
            confidence: working_transcript.confidence,
        };

        let rules_by_id: HashMap<CompiledRuleId, &CompiledComplianceRule> = flow.compliance_rules.iter().map(|r| (r.id, r)).collect();
        let mut ordered_stages: Vec<&CompiledFlowStage> = flow.flow_stages.iter().collect();
        ordered_stages.sort_by_key(|s| s.ordering_index);

        let mut stage_evaluations: Vec<(StageId, StageEvaluation)> = Vec::with_capacity(ordered_stages.len());
        for stage in &ordered_stages {
            let evaluation = self.evaluate_stage(stage, &scored_transcript, &behavior_results, &rule_outcomes, &rules_by_id).await;
            trace.mark(format!("stage_scored:{}", stage.name));
            stage_evaluations.push((stage.id, evaluation));
        }

        let step_passed_all = Self::merge_step_passed(&behavior_results, &stage_evaluations);
        let stage_inputs: Vec<StageInput> = ordered_stages
            .iter()
            .zip(stage_evaluations.iter())
            .map(|(stage, (stage_id, evaluation))| {
                let step_passed = flow
                    .flow_steps
                    .iter()
                    .filter(|s| s.stage_id == *stage_id)
                    .map(|s| (s.id, step_passed_all.get(&s.id).copied().unwrap_or(false)))
                    .collect();
                StageInput { stage_id: stage.id, stage_confidence: evaluation.stage_confidence, used_fallback: evaluation.used_fallback, step_passed }
            })
            .collect();

        let mut rule_failures: Vec<RuleFailure> = rule_outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| RuleFailure { severity: o.severity, forces_overall_fail: matches!(o.action_on_fail, Some(CriticalAction::FailOverall)) })
            .collect();
        for (_, evaluation) in &stage_evaluations {
            if evaluation.critical_violation {
                rule_failures.push(RuleFailure { severity: Severity::Critical, forces_overall_fail: true });
            }
        }

        let scoring = RubricScorer::score(&ScoringInput {
            rubric: flow.rubric,
            stages: &stage_inputs,
            rule_failures: &rule_failures,
            asr_confidence: working_transcript.confidence,
            low_confidence_threshold: self.settings.low_confidence_threshold,
            pass_threshold_band: self.settings.pass_threshold_band,
        });
        trace.mark("scored");

        let violations: Vec<ViolationRecord> = rule_outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| ViolationRecord { rule_id: o.rule_id, severity: o.severity, evidence: &o.evidence, action_on_fail: o.action_on_fail })
            .collect();
        let stage_summaries: Vec<StageSummary> = ordered_stages
            .iter()
            .zip(stage_evaluations.iter())
            .map(|(stage, (_, evaluation))| StageSummary {
                stage_id: stage.id,
                stage_name: stage.name.clone(),
                stage_score: evaluation.stage_score,
                stage_confidence: evaluation.stage_confidence,
                critical_violation: evaluation.critical_violation,
                used_fallback: evaluation.used_fallback,
            })
            .collect();
        let explanation = format!(
            "overall {} ({:.0}/100); {} violation(s) across {} stage(s); human review {}",
            if scoring.overall_passed { "passed" } else { "failed" },
            scoring.overall_score,
            violations.len(),
            ordered_stages.len(),
            if scoring.requires_human_review { "recommended" } else { "not required" },
        );

        CoreRunOutput {
            deterministic_results: DeterministicResults {
                behaviors: serde_json::to_value(&behavior_results).unwrap_or(serde_json::Value::Null),
                rule_outcomes: serde_json::to_value(&rule_outcomes).unwrap_or(serde_json::Value::Null),
            },
            llm_stage_evaluations: LlmStageEvaluations {
                stages: serde_json::to_value(stage_evaluations.iter().map(|(_, e)| e).collect::<Vec<_>>()).unwrap_or(serde_json::Value::Null),
            },
            overall_score: scoring.overall_score,
            overall_passed: scoring.overall_passed,
            requires_human_review: scoring.requires_human_review,
            confidence_score: scoring.confidence_score,
            final_evaluation: FinalEvaluation {
                category_scores: serde_json::to_value(&scoring.category_scores).unwrap_or(serde_json::Value::Null),
                violations: serde_json::to_value(&violations).unwrap_or(serde_json::Value::Null),
                stage_summaries: serde_json::to_value(&stage_summaries).unwrap_or(serde_json::Value::Null),
                explanation,
            },
        }
    }

    async fn ensure_transcript(&self, recording_id: RecordingId, audio_url: Option<&str>, provided: Option<Transcript>) -> Result<Transcript> {
        if let Some(transcript) = provided {
            return Ok(transcript);
        }
        if let Some(existing) = self.store.get_transcript(recording_id).await? {
            return Ok(existing);
        }
        let Some(url) = audio_url else {
            return Err(Error::precondition("recording has no transcript and no audio_url to transcribe"));
        };
        let asr_result = self.asr.transcribe(url).await?;
        let transcript = Transcript {
            recording_id,
            transcript_text: asr_result.transcript_text,
            diarized_segments: asr_result.diarized_segments,
            sentiment_analysis: asr_result.sentiment.unwrap_or_default(),
            confidence: asr_result.confidence,
        };
        self.store.save_transcript(transcript.clone()).await?;
        Ok(transcript)
    }

    /// Transcript acquisition for a sandbox run, which may have no
    /// `RecordingId` of its own (an author testing a draft Blueprint
    /// against ad hoc audio). Falls back to `ensure_transcript`'s
    /// recording-cache path whenever a recording is actually referenced.
    pub async fn acquire_transcript(
        &self,
        recording_id: Option<RecordingId>,
        audio_url: Option<&str>,
        provided: Option<Transcript>,
    ) -> Result<Transcript> {
        if let Some(transcript) = provided {
            return Ok(transcript);
        }
        if let Some(recording_id) = recording_id {
            return self.ensure_transcript(recording_id, audio_url, None).await;
        }
        let Some(url) = audio_url else {
            return Err(Error::precondition("sandbox run has no transcript, recording, or audio_url to transcribe"));
        };
        let asr_result = self.asr.transcribe(url).await?;
        Ok(Transcript {
            recording_id: RecordingId::new(),
            transcript_text: asr_result.transcript_text,
            diarized_segments: asr_result.diarized_segments,
            sentiment_analysis: asr_result.sentiment.unwrap_or_default(),
            confidence: asr_result.confidence,
        })
    }

    /// Segments whose time window is this stage's detected span (if
    /// anything was detected in it, else the whole call) become the LLM's
    /// view of the stage; deterministic rule outcomes for the stage's own
    /// steps accompany them as `RuleSignal`s.
    async fn evaluate_stage(
        &self,
        stage: &CompiledFlowStage,
        transcript: &Transcript,
        behavior_results: &[BehaviorResult],
        rule_outcomes: &[RuleOutcome],
        rules_by_id: &HashMap<CompiledRuleId, &CompiledComplianceRule>,
    ) -> StageEvaluation {
        let stage_results: Vec<&BehaviorResult> = behavior_results.iter().filter(|r| r.stage_id == stage.id).collect();
        let detected_start = stage_results.iter().filter_map(|r| r.start).fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))));
        let detected_end = stage_results.iter().filter_map(|r| r.end).fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
        let (window_start, window_end) = match (detected_start, detected_end) {
            (Some(start), Some(end)) => (start, end),
            _ => (0.0, transcript.duration_s()),
        };

        let redacted_segments: Vec<String> = transcript
            .diarized_segments
            .iter()
            .filter(|s| s.start_s < window_end && s.end_s > window_start)
            .map(|s| format!("{}: {}", role_label(s.speaker), s.text))
            .collect();

        let rule_signals: Vec<RuleSignal> = rule_outcomes
            .iter()
            .filter_map(|outcome| {
                let rule = rules_by_id.get(&outcome.rule_id)?;
                let belongs_to_stage = behavior_results.iter().any(|r| r.step_id == rule.target && r.stage_id == stage.id);
                if !belongs_to_stage {
                    return None;
                }
                Some(RuleSignal {
                    step_id: rule.target,
                    rule_type: rule.rule_type,
                    severity: outcome.severity,
                    behavior_type: rule.source_behavior_type,
                    passed: outcome.passed,
                    evidence: outcome.evidence.clone(),
                })
            })
            .collect();

        match self.llm_backend.as_ref() {
            Some(backend) => {
                let evaluator = StageEvaluator::new(
                    backend.as_ref(),
                    self.settings.retry_policy.max_attempts,
                    Duration::from_secs(self.settings.retry_policy.backoff_s[0].max(1)),
                    self.settings.discretionary_cap,
                );
                evaluator.evaluate_stage(&stage.name, &redacted_segments, &rule_signals).await
            }
            None => {
                let null_backend = NullLlmBackend;
                let evaluator = StageEvaluator::new(&null_backend, 1, Duration::from_millis(1), self.settings.discretionary_cap);
                evaluator.evaluate_stage(&stage.name, &redacted_segments, &rule_signals).await
            }
        }
    }

    /// Builds the `(event_start, event_end)` windows that survive trimming
    /// on a long call, buffered by `buffer_s` on each side — every step
    /// that matched (required/critical/optional) or was caught violating a
    /// forbidden behavior, using its own detected timestamps rather than
    /// blueprint phrase text. A semantic-mode match with empty
    /// `expected_phrases` still produced a `start`, so it's covered here
    /// the same as a literal phrase match.
    fn evidence_ranges_from_detections(behavior_results: &[BehaviorResult], buffer_s: f64) -> Vec<(f64, f64)> {
        behavior_results
            .iter()
            .filter(|r| r.detected || r.violation)
            .filter_map(|r| r.start.map(|start| (start, r.end.unwrap_or(start))))
            .map(|(start, end)| ((start - buffer_s).max(0.0), end + buffer_s))
            .collect()
    }

    /// Resolves `timing_rule(reference = previous_step)` against the
    /// compiled flow's global step ordering (stage ordering, then
    /// in-stage ordering) using each step's own detected start time.
    /// Rules whose previous step wasn't detected, or which have no
    /// previous step at all, are left unresolved and fall back to
    /// `call_start` semantics inside the rule engine.
    fn resolve_previous_step_times(flow: &CompiledFlowContext<'_>, behavior_results: &[BehaviorResult]) -> HashMap<CompiledRuleId, f64> {
        let stage_order: HashMap<StageId, i32> = flow.flow_stages.iter().map(|s| (s.id, s.ordering_index)).collect();
        let mut ordered_steps: Vec<&CompiledFlowStep> = flow.flow_steps.iter().collect();
        ordered_steps.sort_by_key(|s| (stage_order.get(&s.stage_id).copied().unwrap_or(0), s.ordering_index));

        let start_by_step: HashMap<CompiledStepId, f64> = behavior_results.iter().filter_map(|r| r.start.map(|start| (r.step_id, start))).collect();

        let mut resolved = HashMap::new();
        for rule in flow.compliance_rules {
            if rule.rule_type != RuleType::TimingRule {
                continue;
            }
            let Some(constraints) = &rule.timing_constraints else { continue };
            if constraints.reference != TimingReference::PreviousStep {
                continue;
            }
            let Some(position) = ordered_steps.iter().position(|s| s.id == rule.target) else { continue };
            if position == 0 {
                continue;
            }
            if let Some(&time) = start_by_step.get(&ordered_steps[position - 1].id) {
                resolved.insert(rule.id, time);
            }
        }
        resolved
    }

    /// Combines deterministic detection (the floor: a violation always
    /// fails its step) with whatever the LLM (or its fallback) judged per
    /// step, so every compiled step — including optional ones with no
    /// compliance rule — has a defensible pass/fail for the scorer.
    fn merge_step_passed(behavior_results: &[BehaviorResult], stage_evaluations: &[(StageId, StageEvaluation)]) -> HashMap<CompiledStepId, bool> {
        let mut passed: HashMap<CompiledStepId, bool> = behavior_results.iter().map(|r| (r.step_id, !r.violation)).collect();
        for (_, evaluation) in stage_evaluations {
            for step_evaluation in &evaluation.step_evaluations {
                passed.insert(step_evaluation.step_id, step_evaluation.passed);
            }
        }
        passed
    }
}
