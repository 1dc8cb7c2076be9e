//! JSON Schema validation for module payloads.
//!
//! Every module declares the shape of the object it expects back from the
//! evaluation backend. Payloads are checked against that schema before they
//! are turned into a [`ModuleResult`](crate::ModuleResult).

use serde_json::Value;
use thiserror::Error;

/// Errors from payload validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Failed to compile schema: {0}")]
    InvalidSchema(String),

    #[error("Payload does not match schema: {}", .0.join("; "))]
    Mismatch(Vec<String>),
}

/// Validate `payload` against `schema`, collecting every violation.
pub fn validate_payload(schema: &Value, payload: &Value) -> Result<(), SchemaError> {
    let validator = jsonschema::options()
        .build(schema)
        .map_err(|e| SchemaError::InvalidSchema(e.to_string()))?;

    let errors: Vec<String> = validator
        .iter_errors(payload)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::Mismatch(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["has_violation"],
            "properties": {
                "has_violation": { "type": "boolean" },
                "score": { "type": "number", "minimum": 0, "maximum": 100 }
            }
        })
    }

    #[test]
    fn test_valid_payload_passes() {
        assert!(validate_payload(&schema(), &json!({"has_violation": false, "score": 80})).is_ok());
    }

    #[test]
    fn test_missing_required_field_fails() {
        let result = validate_payload(&schema(), &json!({"score": 80}));
        match result {
            Err(SchemaError::Mismatch(errors)) => assert_eq!(errors.len(), 1),
            other => panic!("Expected Mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_all_violations_collected() {
        let result = validate_payload(&schema(), &json!({"has_violation": "no", "score": 200}));
        match result {
            Err(SchemaError::Mismatch(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("Expected Mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_schema_reported() {
        let bad = json!({"type": "no-such-type"});
        assert!(matches!(
            validate_payload(&bad, &json!({})),
            Err(SchemaError::InvalidSchema(_))
        ));
    }
}
