//! Settlement tier.
//!
//! Entered only when neither channel produced a fragment. Each settled value
//! is raced against a deadline and the outcome is branched on explicitly.

use std::time::Duration;

use crate::config::SettlementTimeouts;
use crate::error::{Cause, ChatError, ErrorKind, Result, classify};
use crate::provider::{Settlement, StreamResult};
use crate::types::FinishReason;

use super::RequestShape;

/// Outcome of racing a settled value against a deadline.
#[derive(Debug)]
pub(crate) enum Race<T> {
    Ok(T),
    TimedOut,
    Rejected(Cause),
}

/// Await `value` for at most `limit`. The value is dropped if the deadline wins.
pub(crate) async fn race<T>(value: Settlement<T>, limit: Duration) -> Race<T> {
    match tokio::time::timeout(limit, value).await {
        Ok(Ok(value)) => Race::Ok(value),
        Ok(Err(cause)) => Race::Rejected(cause),
        Err(_) => Race::TimedOut,
    }
}

pub(crate) fn has_text(text: &str) -> bool {
    !text.trim().is_empty()
}

/// Render a finish reason for diagnostics. An empty tag reads as `unknown`.
pub(crate) fn describe_finish_reason(reason: &FinishReason) -> String {
    match reason.as_str() {
        "" => "unknown".to_string(),
        tag => tag.to_string(),
    }
}

fn settlement_failure(cause: Cause, shape: &RequestShape) -> ChatError {
    classify(
        cause,
        ErrorKind::SettlementFailure,
        Some(&format!("Result settlement could not complete ({shape})")),
    )
}

fn settlement_timeout(what: &str, limit: Duration, shape: &RequestShape) -> ChatError {
    ChatError::new(
        ErrorKind::SettlementTimeout,
        format!("Timed out after {limit:?} waiting for {what} ({shape})"),
    )
}

/// Recover a final answer from the provider's settled values.
pub(crate) async fn settle(
    result: &mut dyn StreamResult,
    timeouts: &SettlementTimeouts,
    shape: &RequestShape,
) -> Result<String> {
    let finish_reason = match race(result.finish_reason(), timeouts.finish_reason).await {
        Race::Ok(reason) => reason,
        Race::TimedOut => {
            return Err(settlement_timeout(
                "finish reason",
                timeouts.finish_reason,
                shape,
            ));
        }
        Race::Rejected(cause) => return Err(settlement_failure(cause, shape)),
    };

    let text = match race(result.text(), timeouts.text).await {
        Race::Ok(text) => text,
        Race::TimedOut => return Err(settlement_timeout("final text", timeouts.text, shape)),
        Race::Rejected(cause) => return Err(settlement_failure(cause, shape)),
    };

    let invocations = match race(result.tool_invocations(), timeouts.tool_calls).await {
        Race::Ok(invocations) => invocations,
        Race::TimedOut => {
            return Err(settlement_timeout(
                "tool invocations",
                timeouts.tool_calls,
                shape,
            ));
        }
        Race::Rejected(cause) => return Err(settlement_failure(cause, shape)),
    };

    if has_text(&text) {
        tracing::debug!(len = text.len(), "recovered final text from settlement");
        return Ok(text);
    }

    let finish = describe_finish_reason(&finish_reason);

    if !invocations.is_empty() {
        tracing::warn!(
            tool_invocations = invocations.len(),
            finish_reason = %finish,
            grace = ?timeouts.grace,
            "tools invoked without text, re-checking final text"
        );
        tokio::time::sleep(timeouts.grace).await;

        return match race(result.text(), timeouts.text).await {
            Race::Ok(text) if has_text(&text) => {
                tracing::debug!(len = text.len(), "final text arrived after grace period");
                Ok(text)
            }
            Race::Ok(_) | Race::TimedOut => {
                Err(ChatError::no_text_after_tools(invocations.len(), finish).annotate(shape))
            }
            Race::Rejected(cause) => Err(ChatError::no_text_after_tools(invocations.len(), finish)
                .annotate(shape)
                .with_cause(cause)),
        };
    }

    Err(ChatError::new(
        ErrorKind::EmptyStream,
        format!(
            "Stream produced no output ({shape}, finish reason: {finish}, tool invocations: {})",
            invocations.len()
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test(start_paused = true)]
    async fn race_times_out_on_pending_value() {
        let pending: Settlement<String> = futures::future::pending().boxed();
        assert!(matches!(
            race(pending, Duration::from_secs(30)).await,
            Race::TimedOut
        ));
    }

    #[tokio::test]
    async fn race_reports_rejection() {
        let rejected: Settlement<String> =
            futures::future::ready(Err(Cause::message("boom"))).boxed();
        assert!(matches!(
            race(rejected, Duration::from_secs(1)).await,
            Race::Rejected(_)
        ));
    }

    #[test]
    fn whitespace_is_not_text() {
        assert!(!has_text(""));
        assert!(!has_text("   \n\t"));
        assert!(has_text(" x "));
    }

    #[test]
    fn empty_finish_reason_renders_as_unknown() {
        assert_eq!(
            describe_finish_reason(&FinishReason::Other(String::new())),
            "unknown"
        );
        assert_eq!(describe_finish_reason(&FinishReason::ToolCalls), "tool-calls");
    }
}
