//! Scripted provider for tests and demos.
//!
//! [`ScriptedModel`] plays back a [`Script`]: what each channel yields and how
//! each settled value behaves (resolve, reject, or never complete). It
//! records every [`StreamRequest`] and counts reads of each channel and
//! settled value through a shared [`Recorder`], so tests can tell which tiers
//! ran.
//!
//! ```rust
//! use chatrelay::mock::{Script, ScriptedModel};
//!
//! let model = ScriptedModel::new(Script::new().fragments(["Hello", " world"]));
//! let recorder = model.recorder();
//! assert_eq!(recorder.invocations(), 0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::Cause;
use crate::provider::{EventStream, LanguageModel, Settlement, StreamRequest, StreamResult, TextStream};
use crate::types::{FinishReason, StreamEvent, ToolInvocation};

/// Scripted behavior of one settled value.
#[derive(Debug, Clone)]
pub enum Scripted<T> {
    Resolve(T),
    Reject(Cause),
    /// Never completes.
    Hang,
}

impl<T: Clone + Send + 'static> Scripted<T> {
    fn to_settlement(&self) -> Settlement<T> {
        match self {
            Self::Resolve(value) => futures::future::ready(Ok(value.clone())).boxed(),
            Self::Reject(cause) => futures::future::ready(Err(cause.clone())).boxed(),
            Self::Hang => futures::future::pending().boxed(),
        }
    }
}

/// What a [`ScriptedModel`] produces for each invocation.
#[derive(Debug, Clone)]
pub struct Script {
    invocation_error: Option<Cause>,
    fragments: Vec<Result<String, Cause>>,
    events: Vec<StreamEvent>,
    /// One entry per read of the final text; the last entry repeats.
    text: Vec<Scripted<String>>,
    tool_invocations: Scripted<Vec<ToolInvocation>>,
    finish_reason: Scripted<FinishReason>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            invocation_error: None,
            fragments: Vec::new(),
            events: Vec::new(),
            text: vec![Scripted::Resolve(String::new())],
            tool_invocations: Scripted::Resolve(Vec::new()),
            finish_reason: Scripted::Resolve(FinishReason::Stop),
        }
    }
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the invocation itself.
    pub fn fail_invocation(mut self, cause: impl Into<Cause>) -> Self {
        self.invocation_error = Some(cause.into());
        self
    }

    pub fn fragments<I, S>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fragments
            .extend(fragments.into_iter().map(|f| Ok(f.into())));
        self
    }

    /// Append a failing item to the text channel.
    pub fn fragment_error(mut self, cause: impl Into<Cause>) -> Self {
        self.fragments.push(Err(cause.into()));
        self
    }

    pub fn events(mut self, events: Vec<StreamEvent>) -> Self {
        self.events = events;
        self
    }

    /// Behavior of the final text, one entry per read.
    pub fn text_reads(mut self, reads: Vec<Scripted<String>>) -> Self {
        if !reads.is_empty() {
            self.text = reads;
        }
        self
    }

    pub fn final_text(self, text: impl Into<String>) -> Self {
        self.text_reads(vec![Scripted::Resolve(text.into())])
    }

    pub fn tool_invocations(mut self, behavior: Scripted<Vec<ToolInvocation>>) -> Self {
        self.tool_invocations = behavior;
        self
    }

    pub fn finish_reason(mut self, behavior: Scripted<FinishReason>) -> Self {
        self.finish_reason = behavior;
        self
    }
}

/// Read counters shared between a [`ScriptedModel`] and its results.
#[derive(Debug, Default)]
pub struct Recorder {
    requests: Mutex<Vec<StreamRequest>>,
    text_streams: AtomicUsize,
    event_streams: AtomicUsize,
    text_reads: AtomicUsize,
    tool_reads: AtomicUsize,
    finish_reads: AtomicUsize,
}

impl Recorder {
    /// Number of provider invocations.
    pub fn invocations(&self) -> usize {
        self.requests().len()
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn text_streams(&self) -> usize {
        self.text_streams.load(Ordering::SeqCst)
    }

    pub fn event_streams(&self) -> usize {
        self.event_streams.load(Ordering::SeqCst)
    }

    pub fn text_reads(&self) -> usize {
        self.text_reads.load(Ordering::SeqCst)
    }

    pub fn tool_reads(&self) -> usize {
        self.tool_reads.load(Ordering::SeqCst)
    }

    pub fn finish_reads(&self) -> usize {
        self.finish_reads.load(Ordering::SeqCst)
    }

    /// Total reads of settled values.
    pub fn settlement_reads(&self) -> usize {
        self.text_reads() + self.tool_reads() + self.finish_reads()
    }
}

/// A [`LanguageModel`] that replays a [`Script`] on every invocation.
#[derive(Debug, Clone)]
pub struct ScriptedModel {
    model_id: String,
    script: Script,
    recorder: Arc<Recorder>,
}

impl ScriptedModel {
    pub fn new(script: Script) -> Self {
        Self {
            model_id: "scripted".to_string(),
            script,
            recorder: Arc::new(Recorder::default()),
        }
    }

    pub fn recorder(&self) -> Arc<Recorder> {
        Arc::clone(&self.recorder)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn stream_text(&self, request: StreamRequest) -> Result<Box<dyn StreamResult>, Cause> {
        self.recorder
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        if let Some(cause) = &self.script.invocation_error {
            return Err(cause.clone());
        }

        Ok(Box::new(ScriptedResult {
            fragments: Some(self.script.fragments.clone()),
            events: Some(self.script.events.clone()),
            script: self.script.clone(),
            text_reads: AtomicUsize::new(0),
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

struct ScriptedResult {
    fragments: Option<Vec<Result<String, Cause>>>,
    events: Option<Vec<StreamEvent>>,
    script: Script,
    /// Reads of the final text through this result.
    text_reads: AtomicUsize,
    recorder: Arc<Recorder>,
}

impl StreamResult for ScriptedResult {
    fn text_stream(&mut self) -> TextStream {
        self.recorder.text_streams.fetch_add(1, Ordering::SeqCst);
        Box::pin(futures::stream::iter(self.fragments.take().unwrap_or_default()))
    }

    fn event_stream(&mut self) -> EventStream {
        self.recorder.event_streams.fetch_add(1, Ordering::SeqCst);
        Box::pin(futures::stream::iter(self.events.take().unwrap_or_default()))
    }

    fn text(&self) -> Settlement<String> {
        self.recorder.text_reads.fetch_add(1, Ordering::SeqCst);
        let read = self.text_reads.fetch_add(1, Ordering::SeqCst);
        let idx = read.min(self.script.text.len().saturating_sub(1));
        match self.script.text.get(idx) {
            Some(behavior) => behavior.to_settlement(),
            None => futures::future::ready(Ok(String::new())).boxed(),
        }
    }

    fn tool_invocations(&self) -> Settlement<Vec<ToolInvocation>> {
        self.recorder.tool_reads.fetch_add(1, Ordering::SeqCst);
        self.script.tool_invocations.to_settlement()
    }

    fn finish_reason(&self) -> Settlement<FinishReason> {
        self.recorder.finish_reads.fetch_add(1, Ordering::SeqCst);
        self.script.finish_reason.to_settlement()
    }
}
