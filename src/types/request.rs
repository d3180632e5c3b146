//! Inbound chat request.

use serde::{Deserialize, Serialize};

use super::message::HistoryEntry;
use super::tools::{ContextData, ToolDeclaration};

/// A single streaming chat request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    /// The new user message.
    pub text: String,
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDeclaration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_data: Option<ContextData>,
}

impl ChatRequest {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDeclaration>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_context_data(mut self, context_data: ContextData) -> Self {
        self.context_data = Some(context_data);
        self
    }

    /// Number of declared tools.
    pub fn tool_count(&self) -> usize {
        self.tools.as_ref().map_or(0, Vec::len)
    }

    /// Context data keys, in map order.
    pub fn context_keys(&self) -> Vec<&str> {
        self.context_data
            .as_ref()
            .map(|data| data.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
