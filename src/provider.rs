//! Outbound provider contract.
//!
//! The orchestrator drives any provider that can start a streaming generation
//! and hand back a [`StreamResult`]: a plain text channel, a richer event
//! channel, and three values that settle once generation ends. Settled values
//! may resolve, reject or never complete; callers are expected to bound them.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use futures::future::BoxFuture;

use crate::config::OrchestratorConfig;
use crate::error::{Cause, Result};
use crate::tools::ToolSet;
use crate::types::{ChatMessage, FinishReason, StreamEvent, ToolInvocation};

/// Incremental text fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = std::result::Result<String, Cause>> + Send>>;

/// Text deltas interleaved with tool, finish and error events.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// A value available once generation is complete.
pub type Settlement<T> = BoxFuture<'static, std::result::Result<T, Cause>>;

/// Parameters of a single streaming call.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Option<ToolSet>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Upper bound on tool-call rounds the provider may drive.
    pub max_tool_rounds: u32,
}

/// Handle on a running generation.
pub trait StreamResult: Send {
    /// Take the text channel. Later calls return an empty stream.
    fn text_stream(&mut self) -> TextStream;

    /// Take the event channel. Later calls return an empty stream.
    fn event_stream(&mut self) -> EventStream;

    /// Final concatenated text. Each call reads the value afresh.
    fn text(&self) -> Settlement<String>;

    /// Tool invocations the model performed.
    fn tool_invocations(&self) -> Settlement<Vec<ToolInvocation>>;

    fn finish_reason(&self) -> Settlement<FinishReason>;
}

/// A model handle able to start streaming generations.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn stream_text(
        &self,
        request: StreamRequest,
    ) -> std::result::Result<Box<dyn StreamResult>, Cause>;
}

/// Creates model handles from the orchestrator configuration.
pub trait ModelFactory: Send + Sync {
    fn create_model(&self, config: &OrchestratorConfig) -> Result<Arc<dyn LanguageModel>>;
}

impl<F> ModelFactory for F
where
    F: Fn(&OrchestratorConfig) -> Result<Arc<dyn LanguageModel>> + Send + Sync,
{
    fn create_model(&self, config: &OrchestratorConfig) -> Result<Arc<dyn LanguageModel>> {
        self(config)
    }
}
