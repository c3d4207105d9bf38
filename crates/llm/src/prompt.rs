//! Deterministic prompt construction for stage evaluation. The prompt text
//! is hashed so two runs over identical inputs can be proven reproducible
//! in logs without storing the (possibly large, PII-redacted) prompt body.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub struct StagePromptInputs<'a> {
    pub stage_name: &'a str,
    pub redacted_segments: &'a [String],
    pub rule_summaries: &'a [String],
    pub discretionary_cap: f64,
}

pub fn build_stage_prompt(inputs: &StagePromptInputs<'_>) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("Evaluate agent performance for stage \"{}\".\n\n", inputs.stage_name));
    prompt.push_str("Transcript segments:\n");
    for segment in inputs.redacted_segments {
        prompt.push_str("- ");
        prompt.push_str(segment);
        prompt.push('\n');
    }
    prompt.push_str("\nDeterministic rule results for this stage:\n");
    for summary in inputs.rule_summaries {
        prompt.push_str("- ");
        prompt.push_str(summary);
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "\nReturn stage_score (0-100), step_evaluations, stage_feedback, stage_confidence (0-1), and critical_violation. \
         Discretionary adjustments beyond rule-driven deductions are capped at {:.0} points.\n",
        inputs.discretionary_cap
    ));
    prompt
}

/// Stable hash of the prompt text, stored alongside the stage evaluation
/// for reproducibility auditing.
pub fn hash_prompt(prompt: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    prompt.hash(&mut hasher);
    hasher.finish()
}
