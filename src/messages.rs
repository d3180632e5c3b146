//! Prompt assembly.
//!
//! Builds the ordered list of turns sent to the provider: history first, then
//! synthetic tool-call/tool-result turns for pre-fetched context data, then
//! the new user message.

use serde_json::Value;

use crate::types::{ChatMessage, ContextData, HistoryEntry, ToolCall, ToolResult};

/// Call id used for the synthetic tool call answering `tool_name`.
pub fn prefetch_call_id(tool_name: &str) -> String {
    format!("prefetch_{tool_name}")
}

/// Assemble the prompt for one invocation.
///
/// Context data is injected only when it holds at least one key: a single
/// assistant turn calling every tool with empty arguments, followed by one
/// tool-result turn per key.
pub fn assemble_messages(
    history: &[HistoryEntry],
    text: &str,
    context_data: Option<&ContextData>,
) -> Vec<ChatMessage> {
    let prefetched = context_data.filter(|data| !data.is_empty());
    let synthetic = prefetched.map_or(0, |data| data.len() + 1);

    let mut messages = Vec::with_capacity(history.len() + synthetic + 1);
    messages.extend(history.iter().map(ChatMessage::from));

    if let Some(data) = prefetched {
        let calls = data
            .keys()
            .map(|name| ToolCall {
                id: prefetch_call_id(name),
                name: name.clone(),
                arguments: Value::Object(Default::default()),
            })
            .collect();
        messages.push(ChatMessage::assistant_tool_calls(calls));
        messages.extend(data.iter().map(|(name, output)| {
            ChatMessage::tool_result(ToolResult {
                call_id: prefetch_call_id(name),
                name: name.clone(),
                output: output.clone(),
            })
        }));
    }

    messages.push(ChatMessage::user(text));
    messages
}
