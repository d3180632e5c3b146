//! Streaming chat orchestrator.
//!
//! Turns a [`ChatRequest`] into a lazy stream of text fragments. The provider
//! is read in tiers, each entered only when the previous one produced nothing:
//!
//! 1. **Primary**: the plain text channel, forwarded fragment by fragment.
//! 2. **Secondary**: the event channel. Text deltas are forwarded; the first
//!    error event stops consumption and is raised once the loop exits, after
//!    any deltas that preceded it.
//! 3. **Settlement**: the final text, tool invocations and finish reason, each
//!    raced against a deadline (see [`settlement`]).
//!
//! Anything escaping the tiers, including a failed provider invocation, is
//! classified once with the request shape attached. Errors already classified
//! by a tier are surfaced unchanged.

mod settlement;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::config::{MAX_TOOL_ROUNDS, OrchestratorConfig};
use crate::error::{Cause, ChatError, ErrorKind, Result, classify};
use crate::messages::assemble_messages;
use crate::provider::{LanguageModel, ModelFactory, StreamRequest};
use crate::tools::build_tools;
use crate::types::{ChatMessage, ChatRequest, StreamEvent};

/// Lazily produced response fragments. Ends after at most one error.
pub type ChatTextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Fallback stage of the read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Primary,
    Secondary,
    Settlement,
    Done,
}

/// Request shape attached to diagnostics.
#[derive(Debug, Clone)]
pub(crate) struct RequestShape {
    message_count: usize,
    tool_count: usize,
    context_keys: Vec<String>,
}

impl RequestShape {
    fn new(messages: &[ChatMessage], request: &ChatRequest) -> Self {
        Self {
            message_count: messages.len(),
            tool_count: request.tool_count(),
            context_keys: request
                .context_keys()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Last-resort classification for failures escaping the tiers.
    fn fail(&self, cause: Cause) -> ChatError {
        classify(
            cause,
            ErrorKind::ProviderStream,
            Some(&format!("Streaming chat failed ({self})")),
        )
    }
}

impl fmt::Display for RequestShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "messages: {}, tools: {}, context data: ",
            self.message_count, self.tool_count
        )?;
        if self.context_keys.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&self.context_keys.join(", "))
        }
    }
}

/// Streams chat completions from a provider with tiered fallback.
///
/// Cheap to clone. The configuration and model handle are shared immutably;
/// every invocation builds its own prompt and tool set.
#[derive(Clone)]
pub struct StreamOrchestrator {
    config: Arc<OrchestratorConfig>,
    model: Arc<dyn LanguageModel>,
}

impl fmt::Debug for StreamOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOrchestrator")
            .field("config", &self.config)
            .field("model", &self.model.model_id())
            .finish()
    }
}

impl StreamOrchestrator {
    /// Validate `config` and obtain a model handle from `factory`.
    pub fn new(config: OrchestratorConfig, factory: &dyn ModelFactory) -> Result<Self> {
        config.validate_config()?;
        let model = factory.create_model(&config)?;
        tracing::debug!(
            endpoint = %config.endpoint,
            model = %config.model,
            "stream orchestrator ready"
        );
        Ok(Self {
            config: Arc::new(config),
            model,
        })
    }

    /// Validate `config` and use an existing model handle.
    pub fn with_model(config: OrchestratorConfig, model: Arc<dyn LanguageModel>) -> Result<Self> {
        config.validate_config()?;
        Ok(Self {
            config: Arc::new(config),
            model,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Stream a response to `request`.
    ///
    /// Nothing happens until the returned stream is first polled. Dropping the
    /// stream drops the provider handle with it.
    pub fn stream_chat(&self, request: ChatRequest) -> ChatTextStream {
        let config = Arc::clone(&self.config);
        let model = Arc::clone(&self.model);

        Box::pin(async_stream::stream! {
            let messages = assemble_messages(
                &request.conversation_history,
                &request.text,
                request.context_data.as_ref(),
            );
            let tools = build_tools(request.tools.as_deref(), request.context_data.as_ref());
            let shape = RequestShape::new(&messages, &request);
            let user_id = request.user_id.as_str();

            tracing::debug!(user_id, %shape, "starting chat stream");

            let call = StreamRequest {
                model: config.model.clone(),
                system: request.system_prompt.clone(),
                messages,
                tools,
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                max_tool_rounds: MAX_TOOL_ROUNDS,
            };

            let mut result = match model.stream_text(call).await {
                Ok(result) => result,
                Err(cause) => {
                    let err = shape.fail(cause);
                    tracing::error!(user_id, kind = %err.kind(), "provider invocation failed: {}", err);
                    yield Err(err);
                    return;
                }
            };

            let mut emitted = 0usize;
            let mut tier = Tier::Primary;

            loop {
                match tier {
                    Tier::Primary => {
                        let mut fragments = result.text_stream();
                        while let Some(item) = fragments.next().await {
                            match item {
                                Ok(fragment) => {
                                    emitted += 1;
                                    tracing::trace!(user_id, emitted, "text fragment");
                                    yield Ok(fragment);
                                }
                                Err(cause) => {
                                    let err = shape.fail(cause);
                                    tracing::error!(user_id, emitted, "text channel failed: {}", err);
                                    yield Err(err);
                                    return;
                                }
                            }
                        }
                        tier = if emitted > 0 { Tier::Done } else { Tier::Secondary };
                    }
                    Tier::Secondary => {
                        tracing::warn!(user_id, "text channel was empty, reading event channel");
                        let mut events = result.event_stream();
                        let mut failure: Option<ChatError> = None;
                        while let Some(event) = events.next().await {
                            match event {
                                StreamEvent::TextDelta(text) => {
                                    emitted += 1;
                                    tracing::trace!(user_id, emitted, "event text delta");
                                    yield Ok(text);
                                }
                                StreamEvent::Error(cause) => {
                                    failure = Some(classify(
                                        cause,
                                        ErrorKind::ProviderStream,
                                        Some(&format!("Provider stream reported an error ({shape})")),
                                    ));
                                    break;
                                }
                                other => tracing::trace!(user_id, kind = other.kind(), "skipping event"),
                            }
                        }
                        if let Some(err) = failure {
                            tracing::error!(user_id, emitted, "event channel failed: {}", err);
                            yield Err(err);
                            return;
                        }
                        tier = if emitted > 0 { Tier::Done } else { Tier::Settlement };
                    }
                    Tier::Settlement => {
                        tracing::warn!(user_id, "both channels were empty, awaiting settlement");
                        match settlement::settle(result.as_mut(), &config.settlement, &shape).await {
                            Ok(text) => {
                                emitted += 1;
                                yield Ok(text);
                            }
                            Err(err) => {
                                tracing::error!(user_id, kind = %err.kind(), "settlement failed: {}", err);
                                yield Err(err);
                                return;
                            }
                        }
                        tier = Tier::Done;
                    }
                    Tier::Done => break,
                }
            }

            tracing::debug!(user_id, emitted, "chat stream complete");
        })
    }
}

/// Drain a chat stream into a single string.
pub async fn collect_text(mut stream: ChatTextStream) -> Result<String> {
    let mut out = String::new();
    while let Some(fragment) = stream.next().await {
        out.push_str(&fragment?);
    }
    Ok(out)
}
