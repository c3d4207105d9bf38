//! Publish-time structural and semantic checks, run in the fixed order the
//! contract specifies. Each check appends to `errors` or `warnings`; nothing
//! short-circuits so a single publish attempt surfaces every problem.

use qa_core::{Behavior, BehaviorType, Blueprint, DetectionMode, Stage};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

const MAX_PHRASE_LEN: usize = 200;
const SUPPORTED_LANGUAGE_HINTS: &[&str] = &["en", "hi", "en-IN", "es", "fr"];

#[derive(Debug, Clone, Serialize)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the ten publish-time checks in order. `force_normalize_weights`
/// downgrades the weight-sum checks (4, 5) from errors to a no-op, since
/// normalization happens afterwards in [`normalize_weights`].
pub fn validate_blueprint(blueprint: &Blueprint, force_normalize_weights: bool) -> ValidationOutcome {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // 1. >= 1 stage; each stage has >= 1 behavior.
    if blueprint.stages.is_empty() {
        errors.push(ValidationError {
            code: "NO_STAGES",
            message: "blueprint must have at least one stage".into(),
        });
    }
    for stage in &blueprint.stages {
        if stage.behaviors.is_empty() {
            errors.push(ValidationError {
                code: "NO_BEHAVIORS",
                message: format!("stage '{}' has no behaviors", stage.stage_name),
            });
        }
    }

    // 2. Unique stage names; unique behavior names within each stage.
    let mut seen_stage_names = HashSet::new();
    for stage in &blueprint.stages {
        if !seen_stage_names.insert(stage.stage_name.as_str()) {
            errors.push(ValidationError {
                code: "DUPLICATE_STAGE_NAME",
                message: format!("duplicate stage name '{}'", stage.stage_name),
            });
        }
        let mut seen_behavior_names = HashSet::new();
        for behavior in &stage.behaviors {
            if !seen_behavior_names.insert(behavior.behavior_name.as_str()) {
                errors.push(ValidationError {
                    code: "DUPLICATE_BEHAVIOR_NAME",
                    message: format!(
                        "duplicate behavior name '{}' in stage '{}'",
                        behavior.behavior_name, stage.stage_name
                    ),
                });
            }
        }
    }

    // 3. Every behavior weight >= 0.
    for stage in &blueprint.stages {
        for behavior in &stage.behaviors {
            if behavior.weight < 0.0 {
                errors.push(ValidationError {
                    code: "NEGATIVE_WEIGHT",
                    message: format!("behavior '{}' has negative weight", behavior.behavior_name),
                });
            }
        }
    }

    // 4. Stage weights sum to 100 +/- 0.01, unless force_normalize_weights.
    if !force_normalize_weights {
        let total: f64 = blueprint.stages.iter().filter_map(|s| s.stage_weight).sum();
        let any_set = blueprint.stages.iter().any(|s| s.stage_weight.is_some());
        if any_set && (total - 100.0).abs() > 0.01 {
            errors.push(ValidationError {
                code: "STAGE_WEIGHTS_NOT_NORMALIZED",
                message: format!("stage weights sum to {total}, expected 100"),
            });
        }
    }

    // 5. Within each stage, sum of behavior weights > 0, unless force_normalize_weights.
    if !force_normalize_weights {
        for stage in &blueprint.stages {
            let sum: f64 = stage.behaviors.iter().map(|b| b.weight).sum();
            if sum <= 0.0 && !stage.behaviors.is_empty() {
                errors.push(ValidationError {
                    code: "ZERO_BEHAVIOR_WEIGHT_SUM",
                    message: format!("stage '{}' has zero total behavior weight", stage.stage_name),
                });
            }
        }
    }

    // 6. detection_mode != semantic => non-empty phrases, each <= 200 chars.
    for stage in &blueprint.stages {
        for behavior in &stage.behaviors {
            if behavior.detection_mode != DetectionMode::Semantic {
                match &behavior.phrases {
                    None => errors.push(ValidationError {
                        code: "MISSING_PHRASES",
                        message: format!(
                            "behavior '{}' requires phrases for detection_mode {:?}",
                            behavior.behavior_name, behavior.detection_mode
                        ),
                    }),
                    Some(phrases) => {
                        if phrases.is_empty() {
                            errors.push(ValidationError {
                                code: "MISSING_PHRASES",
                                message: format!("behavior '{}' has an empty phrase list", behavior.behavior_name),
                            });
                        }
                        for phrase in phrases {
                            if phrase.len() > MAX_PHRASE_LEN {
                                errors.push(ValidationError {
                                    code: "PHRASE_TOO_LONG",
                                    message: format!(
                                        "behavior '{}' has a phrase longer than {} chars",
                                        behavior.behavior_name, MAX_PHRASE_LEN
                                    ),
                                });
                            }
                        }
                    }
                }
            }
        }
    }

    // 7. behavior_type = critical => critical_action present.
    for stage in &blueprint.stages {
        for behavior in &stage.behaviors {
            if behavior.behavior_type == BehaviorType::Critical && behavior.critical_action.is_none() {
                errors.push(ValidationError {
                    code: "MISSING_CRITICAL_ACTION",
                    message: format!("critical behavior '{}' has no critical_action", behavior.behavior_name),
                });
            }
        }
    }

    // 8. required ∩ forbidden = ∅ per stage.
    for stage in &blueprint.stages {
        let required_phrases = phrase_set(stage, |t| t == BehaviorType::Required || t == BehaviorType::Critical);
        let forbidden_phrases = phrase_set(stage, |t| t == BehaviorType::Forbidden);
        for phrase in required_phrases.intersection(&forbidden_phrases) {
            errors.push(ValidationError {
                code: "REQUIRED_FORBIDDEN_OVERLAP",
                message: format!("phrase '{}' in stage '{}' is both required and forbidden", phrase, stage.stage_name),
            });
        }
    }

    // 9. Phrases duplicated across behaviors within a stage -> warning.
    for stage in &blueprint.stages {
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for behavior in &stage.behaviors {
            if let Some(phrases) = &behavior.phrases {
                for phrase in phrases {
                    *counts.entry(phrase.as_str()).or_insert(0) += 1;
                }
            }
        }
        for (phrase, count) in counts {
            if count > 1 {
                warnings.push(ValidationWarning {
                    code: "DUPLICATE_PHRASE",
                    message: format!("phrase '{}' repeated across behaviors in stage '{}'", phrase, stage.stage_name),
                });
            }
        }
    }

    // 10. Language hint outside supported list -> warning.
    for stage in &blueprint.stages {
        for behavior in &stage.behaviors {
            if let Some(hint) = behavior.metadata.get("language_hint").and_then(|v| v.as_str()) {
                if !SUPPORTED_LANGUAGE_HINTS.contains(&hint) {
                    warnings.push(ValidationWarning {
                        code: "UNSUPPORTED_LANGUAGE_HINT",
                        message: format!("behavior '{}' has unsupported language_hint '{}'", behavior.behavior_name, hint),
                    });
                }
            }
        }
    }

    ValidationOutcome { errors, warnings }
}

fn phrase_set(stage: &Stage, matches: impl Fn(BehaviorType) -> bool) -> HashSet<String> {
    stage
        .behaviors
        .iter()
        .filter(|b| matches(b.behavior_type))
        .filter_map(|b| b.phrases.as_ref())
        .flatten()
        .cloned()
        .collect()
}

/// Scales stage weights to sum to 100 and, within each stage, behavior
/// weights to sum to that stage's normalized weight. Distributes evenly
/// when the original sums are zero.
pub fn normalize_weights(blueprint: &mut Blueprint) {
    let total_stage_weight: f64 = blueprint.stages.iter().filter_map(|s| s.stage_weight).sum();
    let stage_count = blueprint.stages.len().max(1) as f64;

    for stage in &mut blueprint.stages {
        let normalized = if total_stage_weight > 0.0 {
            stage.stage_weight.unwrap_or(0.0) / total_stage_weight * 100.0
        } else {
            100.0 / stage_count
        };
        stage.stage_weight = Some(normalized);

        let behavior_sum: f64 = stage.behaviors.iter().map(|b: &Behavior| b.weight).sum();
        let behavior_count = stage.behaviors.len().max(1) as f64;
        for behavior in &mut stage.behaviors {
            behavior.weight = if behavior_sum > 0.0 {
                behavior.weight / behavior_sum * normalized
            } else {
                normalized / behavior_count
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qa_core::{Behavior, BehaviorType, Blueprint, CriticalAction, DetectionMode, Stage};

    fn sample_blueprint() -> Blueprint {
        let mut blueprint = Blueprint::new("company-1", "Sample");
        let mut stage = Stage::new("Opening", 0);
        stage.stage_weight = Some(100.0);
        let mut greet = Behavior::new("greet", BehaviorType::Required, DetectionMode::ExactPhrase)
            .with_phrases(vec!["hello".into()]);
        greet.weight = 1.0;
        stage.behaviors.push(greet);
        blueprint.stages.push(stage);
        blueprint
    }

    #[test]
    fn valid_blueprint_has_no_errors() {
        let blueprint = sample_blueprint();
        let outcome = validate_blueprint(&blueprint, false);
        assert!(outcome.is_valid(), "{:?}", outcome.errors);
    }

    #[test]
    fn empty_blueprint_is_rejected() {
        let blueprint = Blueprint::new("company-1", "Empty");
        let outcome = validate_blueprint(&blueprint, false);
        assert!(!outcome.is_valid());
        assert!(outcome.errors.iter().any(|e| e.code == "NO_STAGES"));
    }

    #[test]
    fn critical_behavior_without_action_fails() {
        let mut blueprint = sample_blueprint();
        blueprint.stages[0].behaviors[0].behavior_type = BehaviorType::Critical;
        let outcome = validate_blueprint(&blueprint, false);
        assert!(outcome.errors.iter().any(|e| e.code == "MISSING_CRITICAL_ACTION"));

        blueprint.stages[0].behaviors[0].critical_action = Some(CriticalAction::FailStage);
        let outcome = validate_blueprint(&blueprint, false);
        assert!(!outcome.errors.iter().any(|e| e.code == "MISSING_CRITICAL_ACTION"));
    }

    #[test]
    fn required_forbidden_overlap_is_an_error() {
        let mut blueprint = sample_blueprint();
        let mut forbidden = Behavior::new("no_swear", BehaviorType::Forbidden, DetectionMode::ExactPhrase)
            .with_phrases(vec!["hello".into()]);
        forbidden.weight = 1.0;
        blueprint.stages[0].behaviors.push(forbidden);
        let outcome = validate_blueprint(&blueprint, false);
        assert!(outcome.errors.iter().any(|e| e.code == "REQUIRED_FORBIDDEN_OVERLAP"));
    }

    #[test]
    fn normalize_weights_sums_to_hundred() {
        let mut blueprint = sample_blueprint();
        let mut stage2 = Stage::new("Closing", 1);
        stage2.stage_weight = Some(30.0);
        let mut bye = Behavior::new("bye", BehaviorType::Required, DetectionMode::ExactPhrase)
            .with_phrases(vec!["goodbye".into()]);
        bye.weight = 2.0;
        stage2.behaviors.push(bye);
        blueprint.stages.push(stage2);

        normalize_weights(&mut blueprint);

        let total: f64 = blueprint.stages.iter().filter_map(|s| s.stage_weight).sum();
        assert!((total - 100.0).abs() < 0.01, "total={total}");
        for stage in &blueprint.stages {
            let behavior_sum: f64 = stage.behaviors.iter().map(|b| b.weight).sum();
            assert!((behavior_sum - stage.stage_weight.unwrap()).abs() < 0.01);
        }
    }
}
