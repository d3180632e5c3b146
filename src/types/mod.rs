//! Core data types exchanged between the caller, the orchestrator and providers.

mod message;
mod request;
mod stream;
mod tools;

pub use message::{Author, ChatMessage, HistoryEntry, MessageContent, MessageRole};
pub use request::ChatRequest;
pub use stream::{FinishReason, StreamEvent};
pub use tools::{ContextData, ToolCall, ToolDeclaration, ToolInvocation, ToolResult};
