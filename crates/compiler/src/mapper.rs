//! Pure Blueprint snapshot -> compiled artifacts mapping. All artifact ids
//! are generated up front so cross-references are resolvable before any
//! persistence happens, keeping this function trivially testable.

use qa_core::{
    Behavior, BehaviorType, Blueprint, BlueprintVersionId, CompiledComplianceRule,
    CompiledFlowStage, CompiledFlowStep, CompiledFlowVersion, CompiledFlowVersionId,
    CompiledRubricTemplate, CriticalAction, DetectionMode, MatchMode, RubricCategory,
    RubricMapping, RuleType, Severity, Stage, TimingConstraints,
};
use qa_core::compiled::{ExpectedRole, TimingReference};
use qa_core::ids::{CompiledRuleId, CompiledStepId, RubricCategoryId};
use std::collections::HashMap;

pub struct CompiledArtifacts {
    pub flow_version: CompiledFlowVersion,
    pub flow_stages: Vec<CompiledFlowStage>,
    pub flow_steps: Vec<CompiledFlowStep>,
    pub compliance_rules: Vec<CompiledComplianceRule>,
    pub rubric_template: CompiledRubricTemplate,
}

pub fn map_blueprint_to_artifacts(
    blueprint: &Blueprint,
    blueprint_version_id: BlueprintVersionId,
    company_id: &str,
    version_number: i32,
) -> CompiledArtifacts {
    let flow_version_id = CompiledFlowVersionId::new();
    let flow_version = map_flow_version(blueprint, blueprint_version_id, company_id, flow_version_id, version_number);

    let mut flow_stages = Vec::new();
    let mut flow_steps = Vec::new();
    let mut compliance_rules = Vec::new();

    for stage in &blueprint.stages {
        let flow_stage = map_flow_stage(stage, flow_version_id);
        for (ordering_index, behavior) in stage.behaviors.iter().enumerate() {
            let flow_step = map_flow_step(behavior, flow_stage.id, ordering_index as i32);
            compliance_rules.extend(map_compliance_rules(behavior, flow_version_id, flow_step.id));
            flow_steps.push(flow_step);
        }
        flow_stages.push(flow_stage);
    }

    let rubric_template = map_rubric_template(blueprint, flow_version_id, &flow_stages, &flow_steps);

    CompiledArtifacts {
        flow_version,
        flow_stages,
        flow_steps,
        compliance_rules,
        rubric_template,
    }
}

fn map_flow_version(
    blueprint: &Blueprint,
    blueprint_version_id: BlueprintVersionId,
    company_id: &str,
    flow_version_id: CompiledFlowVersionId,
    version_number: i32,
) -> CompiledFlowVersion {
    let short_id = blueprint.id.short();
    let name = CompiledFlowVersion::display_name(&blueprint.name, &short_id, version_number);

    let mut metadata = HashMap::new();
    metadata.insert("pii_redaction_required".to_string(), serde_json::json!(true));
    metadata.insert("pii_preserve_raw_transcript".to_string(), serde_json::json!(false));

    CompiledFlowVersion {
        id: flow_version_id,
        company_id: company_id.to_string(),
        blueprint_version_id,
        name,
        description: blueprint.description.clone(),
        is_active: true,
        version_number,
        language: None,
        metadata,
    }
}

fn map_flow_stage(stage: &Stage, flow_version_id: CompiledFlowVersionId) -> CompiledFlowStage {
    CompiledFlowStage {
        id: stage.id,
        flow_version_id,
        name: stage.stage_name.clone(),
        ordering_index: stage.ordering_index,
        stage_weight: stage.stage_weight,
        expected_duration_hint: stage
            .metadata
            .get("expected_duration_hint")
            .and_then(|v| v.as_f64()),
        metadata: stage.metadata.clone(),
    }
}

/// Phrases are always carried through regardless of `detection_mode` — they
/// provide context for semantic prompts too.
fn non_empty_phrases(phrases: &Option<Vec<String>>) -> Option<Vec<String>> {
    let filtered: Vec<String> = phrases
        .as_ref()?
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect();
    if filtered.is_empty() {
        None
    } else {
        Some(filtered)
    }
}

fn map_flow_step(behavior: &Behavior, stage_id: qa_core::ids::StageId, ordering_index: i32) -> CompiledFlowStep {
    let expected_role = match behavior.speaker_hint() {
        "caller" => ExpectedRole::Caller,
        _ => ExpectedRole::Agent,
    };

    CompiledFlowStep {
        id: CompiledStepId::new(),
        stage_id,
        source_behavior_id: behavior.id,
        name: behavior.behavior_name.clone(),
        description: Some(behavior.description.clone()),
        ordering_index,
        expected_role,
        expected_phrases: non_empty_phrases(&behavior.phrases),
        detection_hint: behavior.detection_mode,
        behavior_type: behavior.behavior_type,
        critical_action: behavior.critical_action,
        metadata: behavior.metadata.clone(),
    }
}

fn map_compliance_rules(
    behavior: &Behavior,
    flow_version_id: CompiledFlowVersionId,
    flow_step_id: CompiledStepId,
) -> Vec<CompiledComplianceRule> {
    let (rule_type, severity) = match behavior.behavior_type {
        BehaviorType::Forbidden => (RuleType::ForbiddenPhrase, Severity::Major),
        BehaviorType::Critical => (
            semantic_or_phrase_rule(behavior.detection_mode, &behavior.phrases),
            Severity::Critical,
        ),
        BehaviorType::Required => (
            semantic_or_phrase_rule(behavior.detection_mode, &behavior.phrases),
            Severity::Major,
        ),
        BehaviorType::Optional => return Vec::new(),
    };

    let match_mode = match behavior.detection_mode {
        DetectionMode::ExactPhrase => Some(MatchMode::Exact),
        DetectionMode::Semantic => Some(MatchMode::Semantic),
        DetectionMode::Hybrid => Some(MatchMode::Hybrid),
    };

    let timing_constraints = behavior.timing_requirement().and_then(|v| {
        let within_seconds = v.get("within_seconds")?.as_f64()?;
        let reference = match v.get("reference")?.as_str()? {
            "previous_step" => TimingReference::PreviousStep,
            _ => TimingReference::CallStart,
        };
        Some(TimingConstraints { within_seconds, reference, scope_stage: None })
    });

    vec![CompiledComplianceRule {
        id: CompiledRuleId::new(),
        flow_version_id,
        flow_step_id,
        rule_type,
        target: flow_step_id,
        source_behavior_type: behavior.behavior_type,
        phrases: non_empty_phrases(&behavior.phrases),
        match_mode,
        severity,
        action_on_fail: behavior.critical_action,
        timing_constraints,
        active: true,
        params: None,
    }]
}

fn semantic_or_phrase_rule(detection_mode: DetectionMode, phrases: &Option<Vec<String>>) -> RuleType {
    let has_phrases = phrases.as_ref().map(|p| !p.is_empty()).unwrap_or(false);
    if detection_mode == DetectionMode::Semantic && !has_phrases {
        RuleType::RequiredStep
    } else if has_phrases {
        RuleType::RequiredPhrase
    } else {
        RuleType::RequiredStep
    }
}

fn map_rubric_template(
    blueprint: &Blueprint,
    flow_version_id: CompiledFlowVersionId,
    flow_stages: &[CompiledFlowStage],
    flow_steps: &[CompiledFlowStep],
) -> CompiledRubricTemplate {
    let total_stage_weight: f64 = flow_stages.iter().filter_map(|s| s.stage_weight).sum();
    let stage_count = flow_stages.len().max(1) as f64;

    let mut categories = Vec::new();
    let mut category_by_stage = HashMap::new();

    for stage in flow_stages {
        let normalized_weight = match stage.stage_weight {
            Some(w) if total_stage_weight > 0.0 => w / total_stage_weight * 100.0,
            _ => 100.0 / stage_count,
        };
        let category = RubricCategory {
            id: RubricCategoryId::new(),
            name: stage.name.clone(),
            weight: normalized_weight,
            pass_threshold: 70.0,
            level_definitions: None,
        };
        category_by_stage.insert(stage.id, category.id);
        categories.push(category);
    }

    let mut steps_by_stage: HashMap<qa_core::ids::StageId, Vec<&CompiledFlowStep>> = HashMap::new();
    for step in flow_steps {
        steps_by_stage.entry(step.stage_id).or_default().push(step);
    }

    let mut mappings = Vec::new();
    for stage in flow_stages {
        let Some(&category_id) = category_by_stage.get(&stage.id) else {
            continue;
        };
        let category_weight = categories.iter().find(|c| c.id == category_id).map(|c| c.weight).unwrap_or(0.0);
        let stage_steps = steps_by_stage.get(&stage.id).cloned().unwrap_or_default();
        let step_count = stage_steps.len().max(1) as f64;

        for step in stage_steps {
            mappings.push(RubricMapping {
                category_id,
                flow_step_id: step.id,
                contribution_weight: category_weight / step_count,
                required_flag: matches!(step.behavior_type, BehaviorType::Required | BehaviorType::Critical),
            });
        }
    }

    CompiledRubricTemplate {
        flow_version_id,
        name: format!("Rubric for {}", blueprint.name),
        categories,
        mappings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qa_core::{Behavior, BehaviorType, Blueprint, DetectionMode, Stage};

    fn sample_blueprint() -> Blueprint {
        let mut blueprint = Blueprint::new("company-1", "Sample");
        let mut stage = Stage::new("Opening", 0);
        stage.stage_weight = Some(100.0);
        let greet = Behavior::new("greet", BehaviorType::Required, DetectionMode::ExactPhrase)
            .with_phrases(vec!["hello".into()]);
        stage.behaviors.push(greet);
        let semantic = Behavior::new("empathize", BehaviorType::Required, DetectionMode::Semantic);
        stage.behaviors.push(semantic);
        let forbidden = Behavior::new("no_rude", BehaviorType::Forbidden, DetectionMode::ExactPhrase)
            .with_phrases(vec!["shut up".into()]);
        stage.behaviors.push(forbidden);
        let optional = Behavior::new("small_talk", BehaviorType::Optional, DetectionMode::Semantic);
        stage.behaviors.push(optional);
        blueprint.stages.push(stage);
        blueprint
    }

    #[test]
    fn behavior_and_stage_counts_are_preserved() {
        let blueprint = sample_blueprint();
        let artifacts = map_blueprint_to_artifacts(&blueprint, BlueprintVersionId::new(), "company-1", 1);
        assert_eq!(artifacts.flow_stages.len(), blueprint.stages.len());
        let behavior_count: usize = blueprint.stages.iter().map(|s| s.behaviors.len()).sum();
        assert_eq!(artifacts.flow_steps.len(), behavior_count);
    }

    #[test]
    fn semantic_behavior_keeps_no_phrases_but_phrase_mode_keeps_them() {
        let blueprint = sample_blueprint();
        let artifacts = map_blueprint_to_artifacts(&blueprint, BlueprintVersionId::new(), "company-1", 1);
        let greet_step = artifacts.flow_steps.iter().find(|s| s.name == "greet").unwrap();
        assert_eq!(greet_step.expected_phrases, Some(vec!["hello".to_string()]));
    }

    #[test]
    fn optional_behavior_produces_no_rule() {
        let blueprint = sample_blueprint();
        let artifacts = map_blueprint_to_artifacts(&blueprint, BlueprintVersionId::new(), "company-1", 1);
        let optional_step = artifacts.flow_steps.iter().find(|s| s.name == "small_talk").unwrap();
        assert!(!artifacts.compliance_rules.iter().any(|r| r.flow_step_id == optional_step.id));
    }

    #[test]
    fn forbidden_and_required_rules_never_share_a_phrase() {
        let blueprint = sample_blueprint();
        let artifacts = map_blueprint_to_artifacts(&blueprint, BlueprintVersionId::new(), "company-1", 1);
        let forbidden_phrases: Vec<&String> = artifacts
            .compliance_rules
            .iter()
            .filter(|r| r.rule_type == RuleType::ForbiddenPhrase)
            .filter_map(|r| r.phrases.as_ref())
            .flatten()
            .collect();
        let required_phrases: Vec<&String> = artifacts
            .compliance_rules
            .iter()
            .filter(|r| r.rule_type == RuleType::RequiredPhrase)
            .filter_map(|r| r.phrases.as_ref())
            .flatten()
            .collect();
        for p in forbidden_phrases {
            assert!(!required_phrases.contains(&p));
        }
    }

    #[test]
    fn rubric_category_weights_sum_to_hundred() {
        let blueprint = sample_blueprint();
        let artifacts = map_blueprint_to_artifacts(&blueprint, BlueprintVersionId::new(), "company-1", 1);
        let total: f64 = artifacts.rubric_template.categories.iter().map(|c| c.weight).sum();
        assert!((total - 100.0).abs() < 0.01);
    }
}
