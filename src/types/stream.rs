//! Provider stream events and finish reasons.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::tools::ToolInvocation;
use crate::error::Cause;

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    /// Provider-specific tag.
    Other(String),
}

impl FinishReason {
    /// Map an OpenAI-style `finish_reason` string.
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "tool_calls" | "function_call" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool-calls",
            Self::ContentFilter => "content-filter",
            Self::Error => "error",
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event on the provider's richer event channel.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A fragment of generated text.
    TextDelta(String),
    /// The model called a tool.
    ToolCall(ToolInvocation),
    /// A tool produced its output.
    ToolResult {
        call_id: String,
        name: String,
        output: serde_json::Value,
    },
    /// One generation round finished.
    Finish(FinishReason),
    /// The provider reported an error.
    Error(Cause),
}

impl StreamEvent {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TextDelta(_) => "text-delta",
            Self::ToolCall(_) => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::Finish(_) => "finish",
            Self::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_finish_reasons() {
        assert_eq!(FinishReason::from_wire("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(
            FinishReason::from_wire("eos"),
            FinishReason::Other("eos".into())
        );
        assert_eq!(FinishReason::ToolCalls.to_string(), "tool-calls");
    }
}
