//! Error handling for chatrelay.
//!
//! Every failure surfaced to a caller is a [`ChatError`]: a message, an
//! [`ErrorKind`] tag, and the original [`Cause`] when there is one. Raw
//! failures coming out of a provider are turned into a `ChatError` by
//! [`classify`], which passes already-classified errors through untouched.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, ChatError>;

/// Coarse classification of a [`ChatError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or empty endpoint/credential, raised at construction.
    Configuration,
    /// The provider invocation failed, or its event channel reported an error.
    ProviderStream,
    /// Tools were invoked but no usable text followed.
    NoTextAfterTools,
    /// The stream completed without fragments, tool invocations or final text.
    EmptyStream,
    /// A bounded settlement read exceeded its deadline.
    SettlementTimeout,
    /// A settlement read rejected.
    SettlementFailure,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::ProviderStream => "provider_stream",
            Self::NoTextAfterTools => "no_text_after_tools",
            Self::EmptyStream => "empty_stream",
            Self::SettlementTimeout => "settlement_timeout",
            Self::SettlementFailure => "settlement_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The original value behind a failure.
///
/// Providers may fail with a proper error object or with an arbitrary value
/// (a bare string, a JSON error body). Both shapes are kept as-is.
#[derive(Debug, Clone, Error)]
pub enum Cause {
    /// A native error object.
    #[error(transparent)]
    Error(Arc<dyn StdError + Send + Sync>),
    /// Any other value. Strings are stored as JSON strings.
    #[error("{}", display_value(.0))]
    Value(Value),
}

impl Cause {
    /// Wrap a native error.
    pub fn error<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Error(Arc::new(err))
    }

    /// Wrap a plain message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Value(Value::String(message.into()))
    }

    /// Wrap an arbitrary JSON value.
    pub fn value(value: Value) -> Self {
        Self::Value(value)
    }

    /// Returns the wrapped [`ChatError`] if this cause is an already-classified error.
    pub fn as_classified(&self) -> Option<&ChatError> {
        match self {
            Self::Error(err) => err.downcast_ref::<ChatError>(),
            Self::Value(_) => None,
        }
    }
}

impl From<ChatError> for Cause {
    fn from(err: ChatError) -> Self {
        Self::Error(Arc::new(err))
    }
}

impl From<String> for Cause {
    fn from(message: String) -> Self {
        Self::message(message)
    }
}

impl From<&str> for Cause {
    fn from(message: &str) -> Self {
        Self::message(message)
    }
}

impl From<Value> for Cause {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<serde_json::Error> for Cause {
    fn from(err: serde_json::Error) -> Self {
        Self::error(err)
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A classified, diagnosable failure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ChatError {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<Cause>,
    tool_invocations: Option<usize>,
    finish_reason: Option<String>,
}

impl ChatError {
    /// Create an error without a cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            tool_invocations: None,
            finish_reason: None,
        }
    }

    /// Attach the original cause.
    pub fn with_cause(mut self, cause: Cause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Append request details to the message, as `"<message> [<detail>]"`.
    pub fn annotate(mut self, detail: impl std::fmt::Display) -> Self {
        self.message = format!("{} [{detail}]", self.message);
        self
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Tools ran but no usable text followed them.
    pub fn no_text_after_tools(tool_invocations: usize, finish_reason: impl Into<String>) -> Self {
        let finish_reason = finish_reason.into();
        let mut err = Self::new(
            ErrorKind::NoTextAfterTools,
            format!(
                "Model invoked {tool_invocations} tool(s) but produced no text response \
                 (finish reason: {finish_reason})"
            ),
        );
        err.tool_invocations = Some(tool_invocations);
        err.finish_reason = Some(finish_reason);
        err
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// Number of tool invocations, for [`ErrorKind::NoTextAfterTools`] errors.
    pub fn tool_invocations(&self) -> Option<usize> {
        self.tool_invocations
    }

    /// Finish reason reported alongside [`ErrorKind::NoTextAfterTools`] errors.
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

/// Normalize any failure into a [`ChatError`].
///
/// - An already-classified error is returned unchanged, `kind` and `context`
///   are ignored.
/// - A native error keeps its display text as the message and itself as cause.
/// - Any other value is stringified for the message and kept as cause.
///
/// `context`, when given, prefixes the message as `"<context>: <message>"`.
pub fn classify(cause: Cause, kind: ErrorKind, context: Option<&str>) -> ChatError {
    if let Some(classified) = cause.as_classified() {
        return classified.clone();
    }

    let detail = cause.to_string();
    let message = match context {
        Some(ctx) => format!("{ctx}: {detail}"),
        None => detail,
    };
    ChatError::new(kind, message).with_cause(cause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Error)]
    #[error("socket closed")]
    struct SocketClosed;

    #[test]
    fn classify_native_error_keeps_message_and_cause() {
        let err = classify(Cause::error(SocketClosed), ErrorKind::ProviderStream, None);
        assert_eq!(err.kind(), ErrorKind::ProviderStream);
        assert_eq!(err.message(), "socket closed");
        assert!(matches!(err.cause(), Some(Cause::Error(_))));
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("socket closed"));
    }

    #[test]
    fn classify_string_value() {
        let err = classify(
            Cause::message("rate limited"),
            ErrorKind::ProviderStream,
            Some("Provider stream reported an error"),
        );
        assert_eq!(err.message(), "Provider stream reported an error: rate limited");
        assert!(matches!(err.cause(), Some(Cause::Value(Value::String(s))) if s == "rate limited"));
    }

    #[test]
    fn classify_json_value_is_stringified() {
        let err = classify(
            Cause::value(json!({"code": 429})),
            ErrorKind::SettlementFailure,
            None,
        );
        assert_eq!(err.message(), r#"{"code":429}"#);
        assert!(matches!(err.cause(), Some(Cause::Value(v)) if v["code"] == 429));
    }

    #[test]
    fn classify_passes_classified_error_through() {
        let original = ChatError::no_text_after_tools(2, "tool-calls");
        let err = classify(
            Cause::from(original.clone()),
            ErrorKind::ProviderStream,
            Some("outer"),
        );
        assert_eq!(err.kind(), ErrorKind::NoTextAfterTools);
        assert_eq!(err.message(), original.message());
        assert!(err.cause().is_none());
        assert_eq!(err.tool_invocations(), Some(2));
        assert_eq!(err.finish_reason(), Some("tool-calls"));
    }

    #[test]
    fn no_text_after_tools_message_mentions_count_and_reason() {
        let err = ChatError::no_text_after_tools(1, "unknown");
        assert!(err.to_string().contains("1 tool(s)"));
        assert!(err.to_string().contains("finish reason: unknown"));
    }

    #[test]
    fn annotate_keeps_kind_and_diagnostics() {
        let err = ChatError::no_text_after_tools(3, "stop").annotate("messages: 2, tools: 1");
        assert_eq!(err.kind(), ErrorKind::NoTextAfterTools);
        assert_eq!(err.tool_invocations(), Some(3));
        assert!(err.message().ends_with("(finish reason: stop) [messages: 2, tools: 1]"));
    }
}
