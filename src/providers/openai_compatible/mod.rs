//! OpenAI-compatible streaming provider
//!
//! Talks to any endpoint serving `POST /chat/completions` with
//! `stream: true` and server-sent events: OpenAI itself, or self-hosted and
//! third-party gateways speaking the same protocol.
//!
//! Tool calls are resolved locally: when the model stops for tool calls, each
//! call is validated and answered by its [`CallableTool`](crate::tools::CallableTool),
//! and the next round is requested, up to the request's round limit.

mod client;
mod streaming;
pub mod types;

use thiserror::Error;

pub use client::{OpenAiCompatibleFactory, OpenAiCompatibleModel};

/// Failures while talking to the endpoint.
#[derive(Debug, Error)]
pub enum OpenAiCompatibleError {
    #[error("Failed to send request: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("SSE parsing error: {0}")]
    Sse(String),
    #[error("Invalid stream chunk: {0}")]
    Chunk(#[source] serde_json::Error),
    #[error("Generation stopped before completion")]
    Stopped,
}
