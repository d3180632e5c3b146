//! Model handle and factory.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::config::OrchestratorConfig;
use crate::error::{Cause, ChatError, Result};
use crate::provider::{LanguageModel, ModelFactory, StreamRequest, StreamResult};

use super::streaming::{self, Endpoint};

/// A model served by an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleModel {
    endpoint: Endpoint,
    model: String,
}

impl OpenAiCompatibleModel {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new<S: Into<String>>(
        client: reqwest::Client,
        base_url: &str,
        api_key: SecretString,
        model: S,
    ) -> Self {
        Self {
            endpoint: Endpoint {
                client,
                url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
                api_key,
            },
            model: model.into(),
        }
    }

    /// Full completions URL.
    pub fn url(&self) -> &str {
        &self.endpoint.url
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn stream_text(
        &self,
        mut request: StreamRequest,
    ) -> std::result::Result<Box<dyn StreamResult>, Cause> {
        if request.model.is_empty() {
            request.model = self.model.clone();
        }
        tracing::debug!(
            url = %self.endpoint.url,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, |t| t.len()),
            "starting generation"
        );
        Ok(Box::new(streaming::start(self.endpoint.clone(), request)))
    }
}

/// Builds [`OpenAiCompatibleModel`]s from an [`OrchestratorConfig`].
#[derive(Debug, Clone, Default)]
pub struct OpenAiCompatibleFactory {
    http_client: Option<reqwest::Client>,
}

impl OpenAiCompatibleFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client (proxies, timeouts, TLS).
    pub fn with_http_client(client: reqwest::Client) -> Self {
        Self {
            http_client: Some(client),
        }
    }
}

impl ModelFactory for OpenAiCompatibleFactory {
    fn create_model(&self, config: &OrchestratorConfig) -> Result<Arc<dyn LanguageModel>> {
        let client = match &self.http_client {
            Some(client) => client.clone(),
            None => reqwest::Client::builder().build().map_err(|e| {
                ChatError::configuration(format!("Failed to build HTTP client: {e}"))
            })?,
        };
        Ok(Arc::new(OpenAiCompatibleModel::new(
            client,
            &config.endpoint,
            config.api_key.clone(),
            config.model.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_without_double_slash() {
        let model = OpenAiCompatibleModel::new(
            reqwest::Client::new(),
            "https://llm.example.com/v1/",
            SecretString::from("sk"),
            "m",
        );
        assert_eq!(model.url(), "https://llm.example.com/v1/chat/completions");
        assert_eq!(model.model_id(), "m");
    }

    #[test]
    fn factory_uses_config_model() {
        let config = OrchestratorConfig::builder()
            .endpoint("http://localhost:8080")
            .api_key("sk")
            .model("local-model")
            .build();
        let model = OpenAiCompatibleFactory::new().create_model(&config).unwrap();
        assert_eq!(model.model_id(), "local-model");
    }
}
