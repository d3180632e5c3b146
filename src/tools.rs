//! Tool adapter.
//!
//! Turns request tool declarations into [`CallableTool`]s the provider can
//! execute. Every declared tool is registered. Executing a tool never does
//! I/O: it answers from the context data captured when the tool set was
//! built, or returns a sentinel telling the model the data must come from
//! elsewhere.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::schema::ParamValidator;
use crate::types::{ContextData, ToolDeclaration};

/// Message returned by tools that have no pre-fetched data.
pub const PREFETCH_REQUIRED: &str = "Data should be pre-fetched by Context Service";

/// Tools available to the provider for one invocation, keyed by name.
pub type ToolSet = BTreeMap<String, CallableTool>;

/// A provider-callable tool backed by a context data snapshot.
#[derive(Debug, Clone)]
pub struct CallableTool {
    description: String,
    parameters: Value,
    validator: ParamValidator,
    snapshot: Option<Arc<Value>>,
}

impl CallableTool {
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Parameter schema advertised to the model.
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub fn validator(&self) -> &ParamValidator {
        &self.validator
    }

    /// Return the pre-fetched result, or the sentinel when there is none.
    pub fn execute(&self) -> Value {
        match &self.snapshot {
            Some(value) => Value::clone(value),
            None => json!({ "error": PREFETCH_REQUIRED }),
        }
    }
}

/// Build the tool set for one invocation.
///
/// Returns `None` when no declarations were supplied.
pub fn build_tools(
    declarations: Option<&[ToolDeclaration]>,
    context_data: Option<&ContextData>,
) -> Option<ToolSet> {
    let declarations = declarations?;
    let tools = declarations
        .iter()
        .map(|decl| {
            let snapshot = context_data
                .and_then(|data| data.get(&decl.name))
                .filter(|value| !value.is_null())
                .map(|value| Arc::new(value.clone()));
            if snapshot.is_none() {
                tracing::debug!(tool = %decl.name, "no pre-fetched data for tool");
            }
            let validator = ParamValidator::from_schema(decl.parameters.as_ref());
            let parameters = decl
                .parameters
                .clone()
                .filter(Value::is_object)
                .unwrap_or_else(|| validator.schema().clone());
            let tool = CallableTool {
                description: decl.description.clone(),
                parameters,
                validator,
                snapshot,
            };
            (decl.name.clone(), tool)
        })
        .collect();
    Some(tools)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str) -> ToolDeclaration {
        ToolDeclaration::new(name, format!("{name} lookup"))
    }

    #[test]
    fn no_declarations_means_no_tool_set() {
        assert!(build_tools(None, None).is_none());
    }

    #[test]
    fn execute_returns_prefetched_value() {
        let mut data = ContextData::new();
        data.insert("balance".into(), json!({"amount": 12}));
        let tools = build_tools(Some(&[decl("balance")]), Some(&data)).unwrap();
        let tool = &tools["balance"];
        assert_eq!(tool.execute(), json!({"amount": 12}));
        assert_eq!(tool.execute(), tool.execute());
        assert_eq!(tool.description(), "balance lookup");
    }

    #[test]
    fn execute_without_data_returns_sentinel() {
        let tools = build_tools(Some(&[decl("transactions")]), None).unwrap();
        assert_eq!(
            tools["transactions"].execute(),
            json!({"error": PREFETCH_REQUIRED})
        );
    }

    #[test]
    fn null_context_value_counts_as_missing() {
        let mut data = ContextData::new();
        data.insert("profile".into(), Value::Null);
        let tools = build_tools(Some(&[decl("profile")]), Some(&data)).unwrap();
        assert_eq!(tools["profile"].execute()["error"], PREFETCH_REQUIRED);
    }

    #[test]
    fn primitive_and_string_values_are_returned_verbatim() {
        let mut data = ContextData::new();
        data.insert("count".into(), json!(7));
        data.insert("note".into(), json!("gold member"));
        let tools = build_tools(Some(&[decl("count"), decl("note")]), Some(&data)).unwrap();
        assert_eq!(tools["count"].execute(), json!(7));
        assert_eq!(tools["note"].execute(), json!("gold member"));
    }

    #[test]
    fn every_declaration_is_registered() {
        let mut data = ContextData::new();
        data.insert("a".into(), json!(1));
        let tools = build_tools(Some(&[decl("a"), decl("b")]), Some(&data)).unwrap();
        assert_eq!(tools.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn snapshot_is_isolated_from_later_changes() {
        let mut data = ContextData::new();
        data.insert("a".into(), json!({"v": 1}));
        let tools = build_tools(Some(&[decl("a")]), Some(&data)).unwrap();
        data.insert("a".into(), json!({"v": 2}));
        assert_eq!(tools["a"].execute(), json!({"v": 1}));
    }

    #[test]
    fn undeclared_schema_validator_accepts_any_object() {
        let tools = build_tools(Some(&[decl("a")]), None).unwrap();
        assert!(tools["a"].validator().safe_parse(&json!({"q": 1})).is_ok());
    }
}
