use crate::error::RestfetchError;
use serde_json::{Value, json};

/// Checks a transformed request context before it is built.
pub trait ArgumentValidator: Send + Sync {
    /// # Errors
    /// Returns one human-readable message per violation.
    fn validate(&self, context: &Value) -> Result<(), Vec<String>>;
}

/// Shape every request context must have.
#[must_use]
pub fn request_context_schema() -> Value {
    let scalar_map = json!({
        "type": "object",
        "additionalProperties": { "type": ["string", "number", "boolean", "null"] }
    });
    json!({
        "type": "object",
        "properties": {
            "requestId": { "type": "string" },
            "params": scalar_map,
            "query": { "type": "object" },
            "headers": scalar_map,
            "body": { "type": ["string", "number", "boolean", "object", "array", "null"] },
            "customUrl": { "type": "string" }
        },
        "additionalProperties": false
    })
}

/// [`ArgumentValidator`] backed by a compiled JSON Schema.
pub struct JsonSchemaValidator {
    validator: jsonschema::Validator,
}

impl JsonSchemaValidator {
    /// Validator for [`request_context_schema`].
    ///
    /// # Errors
    /// Returns [`RestfetchError::Config`] if the schema does not compile.
    pub fn new() -> Result<Self, RestfetchError> {
        Self::with_schema(&request_context_schema())
    }

    /// # Errors
    /// Returns [`RestfetchError::Config`] if `schema` does not compile.
    pub fn with_schema(schema: &Value) -> Result<Self, RestfetchError> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| RestfetchError::Config(format!("invalid argument schema: {e}")))?;
        Ok(Self { validator })
    }
}

impl std::fmt::Debug for JsonSchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSchemaValidator").finish_non_exhaustive()
    }
}

impl ArgumentValidator for JsonSchemaValidator {
    fn validate(&self, context: &Value) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(context)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
