//! # chatrelay
//!
//! Streaming chat completions for conversational backends.
//!
#![deny(unsafe_code)]

//! A [`StreamOrchestrator`] takes a user message, the conversation history,
//! the tools the model may reference and any context data already fetched for
//! those tools, and returns a lazy stream of text fragments from a language
//! model provider.
//!
//! Providers do not always deliver through the same channel. The orchestrator
//! reads the plain text channel first, falls back to the event channel when
//! that stays empty, and finally recovers the settled final text, so a caller
//! either receives text or a classified [`ChatError`] explaining why none
//! arrived.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatrelay::prelude::*;
//! use chatrelay::providers::openai_compatible::OpenAiCompatibleFactory;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let config = OrchestratorConfig::builder()
//!         .endpoint("https://api.openai.com/v1")
//!         .api_key("your-api-key")
//!         .model("gpt-4o-mini")
//!         .build();
//!     let orchestrator = StreamOrchestrator::new(config, &OpenAiCompatibleFactory::new())?;
//!
//!     let request = ChatRequest::new("user-42", "What is my balance?")
//!         .with_history(vec![HistoryEntry::user("Hi"), HistoryEntry::bot("Hello!")])
//!         .with_tools(vec![ToolDeclaration::new("balance", "Current account balance")]);
//!
//!     let mut stream = orchestrator.stream_chat(request);
//!     while let Some(fragment) = stream.next().await {
//!         print!("{}", fragment?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod messages;
pub mod mock;
pub mod orchestrator;
pub mod provider;
#[cfg(feature = "openai-compatible")]
pub mod providers;
pub mod schema;
pub mod telemetry;
pub mod tools;
pub mod types;

pub use config::{MAX_TOOL_ROUNDS, OrchestratorConfig, SettlementTimeouts};
pub use error::{Cause, ChatError, ErrorKind, Result, classify};
pub use orchestrator::{ChatTextStream, StreamOrchestrator, collect_text};
pub use provider::{LanguageModel, ModelFactory, StreamRequest, StreamResult};
pub use tools::{CallableTool, ToolSet, build_tools};

/// Common imports.
pub mod prelude {
    pub use crate::config::{OrchestratorConfig, SettlementTimeouts};
    pub use crate::error::{Cause, ChatError, ErrorKind, Result};
    pub use crate::orchestrator::{ChatTextStream, StreamOrchestrator, collect_text};
    pub use crate::provider::{LanguageModel, ModelFactory, StreamRequest, StreamResult};
    pub use crate::types::{
        Author, ChatMessage, ChatRequest, ContextData, FinishReason, HistoryEntry, StreamEvent,
        ToolDeclaration, ToolInvocation,
    };
}
