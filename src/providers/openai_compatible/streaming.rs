//! Generation driver.
//!
//! Each generation runs on its own task. The task streams one round per HTTP
//! request, executes the tools the model called, and starts the next round
//! until the model answers without tool calls or the round limit is hit.
//! Text deltas go to both the text and the event channel; the final outcome
//! is published once through a shared oneshot.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use eventsource_stream::Eventsource;
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::Cause;
use crate::provider::{EventStream, Settlement, StreamRequest, StreamResult, TextStream};
use crate::tools::ToolSet;
use crate::types::{FinishReason, StreamEvent, ToolInvocation};

use super::OpenAiCompatibleError;
use super::types::{
    ChatCompletionChunk, ChatCompletionRequest, WireFunctionCall, WireMessage, WireToolCall,
    wire_tools,
};

/// Where generations are sent.
#[derive(Debug, Clone)]
pub(super) struct Endpoint {
    pub client: reqwest::Client,
    pub url: String,
    pub api_key: SecretString,
}

#[derive(Debug, Clone)]
struct Outcome {
    /// Text of the last round.
    text: String,
    tool_invocations: Vec<ToolInvocation>,
    finish_reason: FinishReason,
}

type SharedOutcome = Shared<BoxFuture<'static, Result<Outcome, Cause>>>;

struct Sinks {
    text: mpsc::UnboundedSender<Result<String, Cause>>,
    events: mpsc::UnboundedSender<StreamEvent>,
    /// Set once a delta went out on the text channel.
    text_sent: AtomicBool,
}

impl Sinks {
    fn new(
        text: mpsc::UnboundedSender<Result<String, Cause>>,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        Self {
            text,
            events,
            text_sent: AtomicBool::new(false),
        }
    }

    // Receivers may be gone; nobody is listening then.
    fn text_delta(&self, delta: &str) {
        self.text_sent.store(true, Ordering::Relaxed);
        let _ = self.text.send(Ok(delta.to_string()));
        let _ = self.events.send(StreamEvent::TextDelta(delta.to_string()));
    }

    fn event(&self, event: StreamEvent) {
        let _ = self.events.send(event);
    }

    /// Report a failed generation on every channel a reader may be on.
    ///
    /// The text channel only carries the failure once it delivered text;
    /// before that it ends empty and readers fall back to the event channel.
    fn failure(&self, cause: &Cause) {
        if self.text_sent.load(Ordering::Relaxed) {
            let _ = self.text.send(Err(cause.clone()));
        }
        let _ = self.events.send(StreamEvent::Error(cause.clone()));
    }
}

/// Handle on a running generation. Dropping it cancels the driver task.
pub(super) struct Generation {
    text: Option<mpsc::UnboundedReceiver<Result<String, Cause>>>,
    events: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    outcome: SharedOutcome,
    _cancel: DropGuard,
}

/// Spawn the driver task for `request`.
pub(super) fn start(endpoint: Endpoint, request: StreamRequest) -> Generation {
    let (text_tx, text_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (settle_tx, settle_rx) = oneshot::channel::<Result<Outcome, Cause>>();
    let token = CancellationToken::new();

    let outcome = settle_rx
        .map(|received| {
            received.unwrap_or_else(|_| Err(Cause::error(OpenAiCompatibleError::Stopped)))
        })
        .boxed()
        .shared();

    let driver_token = token.clone();
    tokio::spawn(async move {
        let sinks = Sinks::new(text_tx, event_tx);
        let result = tokio::select! {
            _ = driver_token.cancelled() => {
                tracing::debug!("generation cancelled");
                return;
            }
            result = run(&endpoint, &request, &sinks) => result,
        };
        match result {
            Ok(outcome) => {
                sinks.event(StreamEvent::Finish(outcome.finish_reason.clone()));
                let _ = settle_tx.send(Ok(outcome));
            }
            Err(cause) => {
                tracing::warn!("generation failed: {}", cause);
                sinks.failure(&cause);
                let _ = settle_tx.send(Err(cause));
            }
        }
    });

    Generation {
        text: Some(text_rx),
        events: Some(event_rx),
        outcome,
        _cancel: token.drop_guard(),
    }
}

impl StreamResult for Generation {
    fn text_stream(&mut self) -> TextStream {
        match self.text.take() {
            Some(mut rx) => futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed(),
            None => futures::stream::empty().boxed(),
        }
    }

    fn event_stream(&mut self) -> EventStream {
        match self.events.take() {
            Some(mut rx) => futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed(),
            None => futures::stream::empty().boxed(),
        }
    }

    fn text(&self) -> Settlement<String> {
        let outcome = self.outcome.clone();
        async move { outcome.await.map(|o| o.text) }.boxed()
    }

    fn tool_invocations(&self) -> Settlement<Vec<ToolInvocation>> {
        let outcome = self.outcome.clone();
        async move { outcome.await.map(|o| o.tool_invocations) }.boxed()
    }

    fn finish_reason(&self) -> Settlement<FinishReason> {
        let outcome = self.outcome.clone();
        async move { outcome.await.map(|o| o.finish_reason) }.boxed()
    }
}

async fn run(endpoint: &Endpoint, request: &StreamRequest, sinks: &Sinks) -> Result<Outcome, Cause> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
        messages.push(WireMessage::system(system));
    }
    messages.extend(request.messages.iter().map(WireMessage::from));
    let tools = request
        .tools
        .as_ref()
        .filter(|tools| !tools.is_empty())
        .map(wire_tools);

    let mut invocations = Vec::new();
    let mut round = 0u32;

    loop {
        round += 1;
        let body = ChatCompletionRequest {
            model: request.model.clone(),
            messages: messages.clone(),
            stream: true,
            tools: tools.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let RoundOutput {
            text,
            calls,
            finish_reason,
        } = stream_round(endpoint, &body, round, sinks).await?;
        let finish_reason = finish_reason
            .as_deref()
            .map(FinishReason::from_wire)
            .unwrap_or_else(|| FinishReason::Other(String::new()));

        tracing::debug!(
            round,
            finish_reason = %finish_reason,
            tool_calls = calls.len(),
            "round complete"
        );

        if calls.is_empty() {
            return Ok(Outcome {
                text,
                tool_invocations: invocations,
                finish_reason,
            });
        }

        let mut wire_calls = Vec::with_capacity(calls.len());
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let (arguments, output) = execute(request.tools.as_ref(), &call);
            sinks.event(StreamEvent::ToolCall(ToolInvocation {
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: arguments.clone(),
            }));
            sinks.event(StreamEvent::ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                output: output.clone(),
            });
            results.push(WireMessage::tool(&call.id, &output));
            invocations.push(ToolInvocation {
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments,
            });
            wire_calls.push(WireToolCall {
                id: call.id,
                kind: "function".to_string(),
                function: WireFunctionCall {
                    name: call.name,
                    arguments: call.arguments,
                },
            });
        }

        if round >= request.max_tool_rounds {
            tracing::warn!(round, "tool round limit reached, stopping");
            return Ok(Outcome {
                text,
                tool_invocations: invocations,
                finish_reason,
            });
        }

        let mut assistant = WireMessage::assistant_tool_calls(wire_calls);
        if !text.is_empty() {
            assistant.content = Some(text);
        }
        messages.push(assistant);
        messages.extend(results);
    }
}

#[derive(Debug, Default)]
struct RoundOutput {
    text: String,
    calls: Vec<AssembledCall>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
struct AssembledCall {
    id: String,
    name: String,
    /// Raw JSON text as streamed.
    arguments: String,
}

async fn stream_round(
    endpoint: &Endpoint,
    body: &ChatCompletionRequest,
    round: u32,
    sinks: &Sinks,
) -> Result<RoundOutput, Cause> {
    let response = endpoint
        .client
        .post(&endpoint.url)
        .bearer_auth(endpoint.api_key.expose_secret())
        .json(body)
        .send()
        .await
        .map_err(|e| Cause::error(OpenAiCompatibleError::Transport(e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Cause::error(OpenAiCompatibleError::Http {
            status: status.as_u16(),
            body,
        }));
    }

    let mut events = std::pin::pin!(response.bytes_stream().eventsource());
    let mut output = RoundOutput::default();
    let mut pending: BTreeMap<u32, PartialCall> = BTreeMap::new();

    while let Some(event) = events.next().await {
        let event = event.map_err(|e| Cause::error(OpenAiCompatibleError::Sse(e.to_string())))?;
        let data = event.data.trim();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            break;
        }

        let payload: Value = serde_json::from_str(data)
            .map_err(|e| Cause::error(OpenAiCompatibleError::Chunk(e)))?;
        if let Some(error) = payload.get("error") {
            return Err(Cause::value(error.clone()));
        }
        let chunk: ChatCompletionChunk = serde_json::from_value(payload)
            .map_err(|e| Cause::error(OpenAiCompatibleError::Chunk(e)))?;

        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                    output.text.push_str(&content);
                    sinks.text_delta(&content);
                }
                for part in delta.tool_calls.unwrap_or_default() {
                    let entry = pending.entry(part.index).or_default();
                    if let Some(id) = part.id {
                        entry.id = Some(id);
                    }
                    if let Some(function) = part.function {
                        if let Some(name) = function.name.filter(|_| entry.name.is_empty()) {
                            entry.name = name;
                        }
                        if let Some(arguments) = function.arguments {
                            entry.arguments.push_str(&arguments);
                        }
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                output.finish_reason = Some(reason);
            }
        }
    }

    output.calls = assemble_calls(pending, round);
    Ok(output)
}

fn assemble_calls(pending: BTreeMap<u32, PartialCall>, round: u32) -> Vec<AssembledCall> {
    pending
        .into_iter()
        .filter(|(_, call)| !call.name.is_empty())
        .map(|(index, call)| AssembledCall {
            id: call
                .id
                .unwrap_or_else(|| format!("call_{round}_{index}")),
            name: call.name,
            arguments: if call.arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                call.arguments
            },
        })
        .collect()
}

/// Run one tool call. Returns the parsed arguments and the tool output.
///
/// Unknown tools and malformed or invalid arguments produce an
/// `{"error": ...}` output for the model instead of failing the generation.
fn execute(tools: Option<&ToolSet>, call: &AssembledCall) -> (Value, Value) {
    let arguments = match serde_json::from_str::<Value>(&call.arguments) {
        Ok(arguments) => arguments,
        Err(e) => {
            return (
                Value::String(call.arguments.clone()),
                json!({ "error": format!("Invalid JSON arguments for tool {}: {e}", call.name) }),
            );
        }
    };

    let Some(tool) = tools.and_then(|tools| tools.get(&call.name)) else {
        tracing::warn!(tool = %call.name, "model called an undeclared tool");
        return (
            arguments,
            json!({ "error": format!("Unknown tool: {}", call.name) }),
        );
    };

    match tool.validator().safe_parse(&arguments) {
        Ok(_) => (arguments, tool.execute()),
        Err(issues) => {
            tracing::debug!(tool = %call.name, %issues, "tool arguments rejected");
            (
                arguments,
                json!({ "error": format!("Invalid arguments for tool {}: {issues}", call.name) }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::tools::{PREFETCH_REQUIRED, build_tools};
    use crate::types::{ChatMessage, ContextData, ToolDeclaration};

    fn call(name: &str, arguments: &str) -> AssembledCall {
        AssembledCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    fn tools() -> ToolSet {
        let mut data = ContextData::new();
        data.insert("balance".into(), json!({"amount": 7}));
        build_tools(
            Some(&[
                ToolDeclaration::new("balance", "Account balance"),
                ToolDeclaration::new("history", "Transactions").with_parameters(json!({
                    "type": "object",
                    "properties": {"days": {"type": "integer"}},
                    "required": ["days"]
                })),
            ]),
            Some(&data),
        )
        .unwrap()
    }

    #[test]
    fn executes_prefetched_tool() {
        let (args, output) = execute(Some(&tools()), &call("balance", "{}"));
        assert_eq!(args, json!({}));
        assert_eq!(output, json!({"amount": 7}));
    }

    #[test]
    fn valid_call_without_data_gets_sentinel() {
        let (_, output) = execute(Some(&tools()), &call("history", r#"{"days": 3}"#));
        assert_eq!(output["error"], PREFETCH_REQUIRED);
    }

    #[test]
    fn invalid_arguments_are_reported_to_the_model() {
        let (_, output) = execute(Some(&tools()), &call("history", "{}"));
        let message = output["error"].as_str().unwrap();
        assert!(message.starts_with("Invalid arguments for tool history"));

        let (args, output) = execute(Some(&tools()), &call("history", "{not json"));
        assert_eq!(args, json!("{not json"));
        assert!(output["error"].as_str().unwrap().contains("Invalid JSON"));
    }

    #[test]
    fn unknown_tool_is_reported_to_the_model() {
        let (_, output) = execute(Some(&tools()), &call("transfer", "{}"));
        assert_eq!(output, json!({"error": "Unknown tool: transfer"}));
        let (_, output) = execute(None, &call("balance", "{}"));
        assert_eq!(output, json!({"error": "Unknown tool: balance"}));
    }

    #[test]
    fn assembles_calls_by_index_and_fills_missing_ids() {
        let mut pending = BTreeMap::new();
        pending.insert(
            1,
            PartialCall {
                id: None,
                name: "history".into(),
                arguments: String::new(),
            },
        );
        pending.insert(
            0,
            PartialCall {
                id: Some("call_abc".into()),
                name: "balance".into(),
                arguments: r#"{"a":1}"#.into(),
            },
        );
        pending.insert(2, PartialCall::default());

        let calls = assemble_calls(pending, 3);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_abc");
        assert_eq!(calls[0].arguments, r#"{"a":1}"#);
        assert_eq!(calls[1].id, "call_3_1");
        assert_eq!(calls[1].arguments, "{}");
    }

    fn endpoint(server: &MockServer) -> Endpoint {
        Endpoint {
            client: reqwest::Client::new(),
            url: format!("{}/v1/chat/completions", server.uri()),
            api_key: SecretString::from("sk-test".to_string()),
        }
    }

    fn request() -> StreamRequest {
        StreamRequest {
            model: "gpt-4o-mini".into(),
            system: None,
            messages: vec![ChatMessage::user("hi")],
            tools: None,
            max_tokens: None,
            temperature: None,
            max_tool_rounds: 5,
        }
    }

    #[tokio::test]
    async fn dropped_generation_rejects_settlements_with_stopped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let generation = start(endpoint(&server), request());
        let text = generation.text();
        let finish_reason = generation.finish_reason();
        drop(generation);

        let err = tokio::time::timeout(Duration::from_secs(5), text)
            .await
            .expect("settles after cancellation")
            .unwrap_err();
        assert_eq!(err.to_string(), OpenAiCompatibleError::Stopped.to_string());
        assert!(
            tokio::time::timeout(Duration::from_secs(5), finish_reason)
                .await
                .expect("settles after cancellation")
                .is_err()
        );
    }

    #[tokio::test]
    async fn failure_after_text_is_sent_on_the_text_channel() {
        let (text_tx, mut text_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let sinks = Sinks::new(text_tx, event_tx);

        sinks.failure(&Cause::message("early"));
        sinks.text_delta("Hi");
        sinks.failure(&Cause::message("late"));
        drop(sinks);

        assert_eq!(text_rx.recv().await.unwrap().unwrap(), "Hi");
        assert_eq!(text_rx.recv().await.unwrap().unwrap_err().to_string(), "late");
        assert!(text_rx.recv().await.is_none());

        let mut errors = 0;
        while let Some(event) = event_rx.recv().await {
            if matches!(event, StreamEvent::Error(_)) {
                errors += 1;
            }
        }
        assert_eq!(errors, 2);
    }
}
