//! Tool parameter validation.
//!
//! Converts a declared JSON schema into a runtime validator. Object-shaped
//! schemas (`properties` and `required`) produce a validator that checks the
//! declared properties, accepts extra fields and never coerces values.
//! Anything else produces a validator that accepts any object.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value, json};

/// Validation failures reported by [`ParamValidator::safe_parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssues(pub Vec<String>);

impl fmt::Display for SchemaIssues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("; "))
    }
}

impl std::error::Error for SchemaIssues {}

/// Compiled validator for tool arguments.
///
/// `compiled` is `None` for the accept-any-object validator.
#[derive(Clone)]
pub struct ParamValidator {
    compiled: Option<Arc<jsonschema::Validator>>,
    schema: Value,
}

impl fmt::Debug for ParamValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamValidator")
            .field("schema", &self.schema)
            .finish()
    }
}

impl ParamValidator {
    /// Build a validator from an optional declared schema.
    pub fn from_schema(schema: Option<&Value>) -> Self {
        let Some(shape) = schema.and_then(object_shape) else {
            return Self::any_object();
        };
        match jsonschema::validator_for(&shape) {
            Ok(compiled) => Self {
                compiled: Some(Arc::new(compiled)),
                schema: shape,
            },
            Err(e) => {
                tracing::warn!("invalid tool schema, accepting any object: {}", e);
                Self::any_object()
            }
        }
    }

    /// A validator that accepts any JSON object.
    pub fn any_object() -> Self {
        Self {
            compiled: None,
            schema: json!({ "type": "object" }),
        }
    }

    /// The schema actually enforced.
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Validate `input`, returning it unchanged on success.
    pub fn safe_parse(&self, input: &Value) -> Result<Value, SchemaIssues> {
        let Some(compiled) = &self.compiled else {
            if input.is_object() {
                return Ok(input.clone());
            }
            return Err(SchemaIssues(vec![format!("{input} is not of type \"object\"")]));
        };
        if compiled.is_valid(input) {
            return Ok(input.clone());
        }
        let issues = compiled
            .iter_errors(input)
            .map(|err| format!("{} at {}", err, err.instance_path))
            .collect();
        Err(SchemaIssues(issues))
    }
}

/// Keep only `properties` and `required` of an object-shaped schema.
fn object_shape(schema: &Value) -> Option<Value> {
    let obj = schema.as_object()?;
    let properties = obj.get("properties").and_then(Value::as_object);
    let declared_object = obj.get("type").and_then(Value::as_str) == Some("object");
    if properties.is_none() && !declared_object {
        return None;
    }

    let mut shape = Map::new();
    shape.insert("type".into(), Value::String("object".into()));
    if let Some(props) = properties {
        shape.insert("properties".into(), Value::Object(props.clone()));
    }
    if let Some(required) = obj.get("required").filter(|r| r.is_array()) {
        shape.insert("required".into(), required.clone());
    }
    Some(Value::Object(shape))
}
