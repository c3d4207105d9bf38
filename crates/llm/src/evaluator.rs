//! Per-stage structured LLM judgment, with a deterministic fallback that
//! keeps the LLM off the critical correctness path: if the provider fails
//! or its response fails schema validation, the fallback below alone must
//! produce a defensible stage evaluation.

use crate::backend::{generate_with_retry, GenerationParams, LlmBackend};
use crate::prompt::{build_stage_prompt, hash_prompt, StagePromptInputs};
use crate::schema::validate_stage_response;
use qa_core::ids::CompiledStepId;
use qa_core::{BehaviorType, RuleType, Severity};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvaluation {
    pub step_id: CompiledStepId,
    pub passed: bool,
    pub rationale: String,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvaluation {
    pub stage_score: f64,
    pub step_evaluations: Vec<StepEvaluation>,
    pub stage_feedback: Vec<String>,
    pub stage_confidence: f64,
    pub critical_violation: bool,
    pub used_fallback: bool,
    pub prompt_hash: u64,
}

/// A single rule outcome, as relevant to one stage, decoupled from
/// `qa-rules`'s own type so this crate doesn't need to depend on it.
#[derive(Debug, Clone)]
pub struct RuleSignal {
    pub step_id: CompiledStepId,
    pub rule_type: RuleType,
    pub severity: Severity,
    /// The originating blueprint behavior type, so the fallback penalty
    /// table can tell "a required behavior went missing" apart from "some
    /// other rule happened to be tagged major severity" — `severity` alone
    /// can't distinguish those.
    pub behavior_type: BehaviorType,
    pub passed: bool,
    pub evidence: Vec<String>,
}

pub struct StageEvaluator<'a> {
    backend: &'a dyn LlmBackend,
    max_attempts: u32,
    initial_backoff: Duration,
    discretionary_cap: f64,
}

impl<'a> StageEvaluator<'a> {
    pub fn new(backend: &'a dyn LlmBackend, max_attempts: u32, initial_backoff: Duration, discretionary_cap: f64) -> Self {
        Self { backend, max_attempts, initial_backoff, discretionary_cap }
    }

    pub async fn evaluate_stage(
        &self,
        stage_name: &str,
        redacted_segments: &[String],
        rule_signals: &[RuleSignal],
    ) -> StageEvaluation {
        let rule_summaries: Vec<String> = rule_signals
            .iter()
            .map(|r| format!("{:?} on step {}: {}", r.rule_type, r.step_id, if r.passed { "passed" } else { "failed" }))
            .collect();

        let prompt = build_stage_prompt(&StagePromptInputs {
            stage_name,
            redacted_segments,
            rule_summaries: &rule_summaries,
            discretionary_cap: self.discretionary_cap,
        });
        let prompt_hash = hash_prompt(&prompt);

        let response = generate_with_retry(
            self.backend,
            &prompt,
            &crate::schema::STAGE_EVALUATION_SCHEMA,
            &GenerationParams::default(),
            self.max_attempts,
            self.initial_backoff,
        )
        .await;

        match response {
            Ok(value) => match validate_stage_response(&value) {
                Ok(()) => {
                    info!(stage = stage_name, prompt_hash, "stage evaluated by llm");
                    self.parse_llm_response(value, prompt_hash)
                }
                Err(reason) => {
                    warn!(stage = stage_name, reason, "llm response failed schema validation, using fallback");
                    self.fallback(rule_signals, prompt_hash, &format!("llm response failed schema validation: {reason}"))
                }
            },
            Err(err) => {
                warn!(stage = stage_name, error = %err, "llm provider failed, using fallback");
                self.fallback(rule_signals, prompt_hash, &format!("llm provider error: {err}"))
            }
        }
    }

    fn parse_llm_response(&self, value: serde_json::Value, prompt_hash: u64) -> StageEvaluation {
        let stage_score = value.get("stage_score").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let stage_confidence = value.get("stage_confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let critical_violation = value.get("critical_violation").and_then(|v| v.as_bool()).unwrap_or(false);
        let stage_feedback = value
            .get("stage_feedback")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let step_evaluations = value
            .get("step_evaluations")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|item| {
                        let step_id: CompiledStepId = item.get("step_id")?.as_str()?.parse().ok().map(CompiledStepId::from_uuid)?;
                        Some(StepEvaluation {
                            step_id,
                            passed: item.get("passed")?.as_bool()?,
                            rationale: item.get("rationale")?.as_str()?.to_string(),
                            evidence: item
                                .get("evidence")
                                .and_then(|v| v.as_array())
                                .map(|e| e.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                                .unwrap_or_default(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        StageEvaluation {
            stage_score: stage_score.clamp(0.0, 100.0),
            step_evaluations,
            stage_feedback,
            stage_confidence: stage_confidence.clamp(0.0, 1.0),
            critical_violation,
            used_fallback: false,
            prompt_hash,
        }
    }

    /// Penalty table: missing required -20, major -40, minor -10,
    /// timing -10; discretionary adjustments (none in a deterministic
    /// fallback) are capped at `discretionary_cap`. `stage_confidence`
    /// is fixed at 0.5 to route the evaluation toward human review.
    ///
    /// "Missing required" and "major" are distinct buckets, not severity
    /// tiers: a required behavior going undetected is `behavior_type ==
    /// Required`, penalized -20, while any other rule tagged major
    /// severity (a forbidden phrase spoken, a failed sequence/conditional
    /// check) is the heavier -40 bucket. A missing `Critical` behavior
    /// always sets `critical_violation` on top of its own -40 penalty.
    fn fallback(&self, rule_signals: &[RuleSignal], prompt_hash: u64, reason: &str) -> StageEvaluation {
        let mut score = 100.0_f64;
        let mut critical_violation = false;
        let mut step_evaluations = Vec::new();

        for signal in rule_signals {
            if signal.passed {
                step_evaluations.push(StepEvaluation {
                    step_id: signal.step_id,
                    passed: true,
                    rationale: "deterministic rule passed".to_string(),
                    evidence: signal.evidence.clone(),
                });
                continue;
            }

            let penalty = if signal.rule_type == RuleType::TimingRule {
                10.0
            } else if signal.behavior_type == BehaviorType::Critical {
                critical_violation = true;
                40.0
            } else if signal.behavior_type == BehaviorType::Required {
                20.0
            } else {
                match signal.severity {
                    Severity::Critical | Severity::Major => 40.0,
                    Severity::Minor => 10.0,
                }
            };
            score -= penalty;
            step_evaluations.push(StepEvaluation {
                step_id: signal.step_id,
                passed: false,
                rationale: format!("deterministic fallback: rule failed ({:?}, {:?})", signal.rule_type, signal.severity),
                evidence: signal.evidence.clone(),
            });
        }

        let _ = self.discretionary_cap; // no discretionary component applies in a deterministic fallback

        StageEvaluation {
            stage_score: score.clamp(0.0, 100.0),
            step_evaluations,
            stage_feedback: vec![format!("stage evaluated via deterministic fallback: {reason}")],
            stage_confidence: 0.5,
            critical_violation,
            used_fallback: true,
            prompt_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    #[tokio::test]
    async fn malformed_response_triggers_fallback() {
        let backend = MockBackend { response: serde_json::json!({"not": "matching schema"}) };
        let evaluator = StageEvaluator::new(&backend, 1, Duration::from_millis(1), 10.0);
        let result = evaluator.evaluate_stage("Opening", &[], &[]).await;
        assert!(result.used_fallback);
        assert_eq!(result.stage_confidence, 0.5);
    }

    #[tokio::test]
    async fn well_formed_response_is_used_directly() {
        let backend = MockBackend {
            response: serde_json::json!({
                "stage_score": 92,
                "step_evaluations": [],
                "stage_feedback": [],
                "stage_confidence": 0.95,
                "critical_violation": false
            }),
        };
        let evaluator = StageEvaluator::new(&backend, 1, Duration::from_millis(1), 10.0);
        let result = evaluator.evaluate_stage("Opening", &[], &[]).await;
        assert!(!result.used_fallback);
        assert_eq!(result.stage_score, 92.0);
    }

    #[tokio::test]
    async fn fallback_forces_critical_violation_on_critical_failure() {
        let backend = MockBackend { response: serde_json::json!({}) };
        let evaluator = StageEvaluator::new(&backend, 1, Duration::from_millis(1), 10.0);
        let signals = vec![RuleSignal {
            step_id: CompiledStepId::new(),
            rule_type: RuleType::RequiredPhrase,
            severity: Severity::Critical,
            behavior_type: BehaviorType::Critical,
            passed: false,
            evidence: vec![],
        }];
        let result = evaluator.evaluate_stage("Opening", &[], &signals).await;
        assert!(result.critical_violation);
    }

    #[tokio::test]
    async fn missing_required_behavior_is_penalized_less_than_major_failure() {
        let backend = MockBackend { response: serde_json::json!({}) };
        let evaluator = StageEvaluator::new(&backend, 1, Duration::from_millis(1), 10.0);

        let required_signal = vec![RuleSignal {
            step_id: CompiledStepId::new(),
            rule_type: RuleType::RequiredStep,
            severity: Severity::Major,
            behavior_type: BehaviorType::Required,
            passed: false,
            evidence: vec![],
        }];
        let forbidden_signal = vec![RuleSignal {
            step_id: CompiledStepId::new(),
            rule_type: RuleType::ForbiddenPhrase,
            severity: Severity::Major,
            behavior_type: BehaviorType::Forbidden,
            passed: false,
            evidence: vec![],
        }];

        let required_result = evaluator.evaluate_stage("Opening", &[], &required_signal).await;
        let forbidden_result = evaluator.evaluate_stage("Opening", &[], &forbidden_signal).await;

        assert_eq!(required_result.stage_score, 80.0);
        assert_eq!(forbidden_result.stage_score, 60.0);
        assert!(required_result.stage_score > forbidden_result.stage_score);
    }
}
