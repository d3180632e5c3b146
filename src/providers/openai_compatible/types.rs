//! Wire types for `/chat/completions`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolSet;
use crate::types::{ChatMessage, MessageContent};

/// Streaming chat completion request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    pub fn assistant_tool_calls(calls: Vec<WireToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, output: &Value) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(value_to_content(output)),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Tool outputs travel as strings; JSON strings are sent without quotes.
fn value_to_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        match &message.content {
            MessageContent::Text { text } => Self::text(message.role.as_str(), text.clone()),
            MessageContent::ToolCalls { calls } => Self::assistant_tool_calls(
                calls
                    .iter()
                    .map(|call| WireToolCall::function(&call.id, &call.name, &call.arguments))
                    .collect(),
            ),
            MessageContent::ToolResult { result } => Self::tool(&result.call_id, &result.output),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: WireFunctionCall,
}

impl WireToolCall {
    pub fn function(id: &str, name: &str, arguments: &Value) -> Self {
        Self {
            id: id.to_string(),
            kind: "function".to_string(),
            function: WireFunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFunctionCall {
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireFunction,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Advertise a tool set in function format.
pub fn wire_tools(tools: &ToolSet) -> Vec<WireTool> {
    tools
        .iter()
        .map(|(name, tool)| WireTool {
            kind: "function",
            function: WireFunction {
                name: name.clone(),
                description: tool.description().to_string(),
                parameters: tool.parameters().clone(),
            },
        })
        .collect()
}

/// One SSE `data:` payload.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// A fragment of a streamed tool call. Fragments sharing `index` belong to
/// the same call; `id` and `name` arrive once, `arguments` in pieces.
#[derive(Debug, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ToolCall, ToolResult};
    use serde_json::json;

    #[test]
    fn synthetic_turns_map_to_tool_call_wire_format() {
        let call = ChatMessage::assistant_tool_calls(vec![ToolCall {
            id: "prefetch_balance".into(),
            name: "balance".into(),
            arguments: json!({}),
        }]);
        let result = ChatMessage::tool_result(ToolResult {
            call_id: "prefetch_balance".into(),
            name: "balance".into(),
            output: json!({"amount": 12}),
        });

        let call = serde_json::to_value(WireMessage::from(&call)).unwrap();
        assert_eq!(
            call,
            json!({
                "role": "assistant",
                "tool_calls": [{
                    "id": "prefetch_balance",
                    "type": "function",
                    "function": {"name": "balance", "arguments": "{}"}
                }]
            })
        );

        let result = serde_json::to_value(WireMessage::from(&result)).unwrap();
        assert_eq!(
            result,
            json!({
                "role": "tool",
                "content": "{\"amount\":12}",
                "tool_call_id": "prefetch_balance"
            })
        );
    }

    #[test]
    fn chunk_parses_partial_tool_call() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":1,"function":{"arguments":"{\"a\""}}]},"finish_reason":null}]}"#,
        )
        .unwrap();
        let delta = chunk.choices[0].delta.as_ref().unwrap();
        let call = &delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.index, 1);
        assert!(call.id.is_none());
        assert_eq!(
            call.function.as_ref().unwrap().arguments.as_deref(),
            Some("{\"a\"")
        );
    }
}
