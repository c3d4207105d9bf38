//! JSON Schema the stage evaluator's structured response must satisfy.
//! Validated with the `jsonschema` crate; a failure here is exactly what
//! triggers the deterministic fallback.

use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_json::{json, Value};

pub static STAGE_EVALUATION_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["stage_score", "step_evaluations", "stage_confidence", "critical_violation"],
        "properties": {
            "stage_score": { "type": "number", "minimum": 0, "maximum": 100 },
            "step_evaluations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["step_id", "passed", "rationale"],
                    "properties": {
                        "step_id": { "type": "string" },
                        "passed": { "type": "boolean" },
                        "rationale": { "type": "string" },
                        "evidence": { "type": "array", "items": { "type": "string" } }
                    }
                }
            },
            "stage_feedback": { "type": "array", "items": { "type": "string" } },
            "stage_confidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "critical_violation": { "type": "boolean" }
        }
    })
});

pub fn validate_stage_response(response: &Value) -> std::result::Result<(), String> {
    let compiled = JSONSchema::compile(&STAGE_EVALUATION_SCHEMA).map_err(|e| e.to_string())?;
    compiled.validate(response).map_err(|errors| {
        errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_response_validates() {
        let response = serde_json::json!({
            "stage_score": 85,
            "step_evaluations": [{"step_id": "abc", "passed": true, "rationale": "ok"}],
            "stage_feedback": [],
            "stage_confidence": 0.9,
            "critical_violation": false
        });
        assert!(validate_stage_response(&response).is_ok());
    }

    #[test]
    fn malformed_response_fails() {
        let response = serde_json::json!({"stage_score": "not a number"});
        assert!(validate_stage_response(&response).is_err());
    }
}
