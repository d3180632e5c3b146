//! Orchestrator configuration.
//!
//! The configuration is the only state shared between invocations. It is
//! validated once, when a [`StreamOrchestrator`](crate::StreamOrchestrator)
//! is constructed, and never mutated afterwards.

use std::borrow::Cow;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::error::{ChatError, Result};

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Upper bound on provider-driven tool-call rounds per invocation.
pub const MAX_TOOL_ROUNDS: u32 = 5;

const ENV_ENDPOINT: &str = "CHATRELAY_ENDPOINT";
const ENV_API_KEY: &str = "CHATRELAY_API_KEY";
const ENV_MODEL: &str = "CHATRELAY_MODEL";
const ENV_MAX_TOKENS: &str = "CHATRELAY_MAX_TOKENS";
const ENV_TEMPERATURE: &str = "CHATRELAY_TEMPERATURE";

/// Deadlines for the settlement tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SettlementTimeouts {
    /// Bound on waiting for the finish reason.
    pub finish_reason: Duration,
    /// Bound on waiting for the final text.
    pub text: Duration,
    /// Bound on waiting for the list of tool invocations.
    pub tool_calls: Duration,
    /// Pause before re-reading the final text after tool invocations.
    pub grace: Duration,
}

impl Default for SettlementTimeouts {
    fn default() -> Self {
        Self {
            finish_reason: Duration::from_secs(5),
            text: Duration::from_secs(30),
            tool_calls: Duration::from_secs(30),
            grace: Duration::from_secs(1),
        }
    }
}

/// Provider connection and sampling settings.
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_credentials", skip_on_field_errors = false))]
pub struct OrchestratorConfig {
    /// Base URL of the provider API.
    #[validate(custom(function = "validate_not_blank"))]
    pub endpoint: String,
    /// Provider credential. Checked by `validate_credentials`.
    pub api_key: SecretString,
    /// Model identifier passed to the provider.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub settlement: SettlementTimeouts,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn validate_not_blank(value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// Parameter naming the offending field on struct-level errors.
const FIELD_PARAM: &str = "field";

// `SecretString` is not `Serialize`, so the key cannot use a field validator.
fn validate_credentials(config: &OrchestratorConfig) -> std::result::Result<(), ValidationError> {
    if config.api_key.expose_secret().trim().is_empty() {
        let mut error = ValidationError::new("blank");
        error.add_param(Cow::Borrowed(FIELD_PARAM), &"api_key");
        return Err(error);
    }
    Ok(())
}

impl OrchestratorConfig {
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Load the configuration from `CHATRELAY_*` environment variables.
    ///
    /// Missing endpoint or key are left empty so that construction reports them.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder()
            .endpoint(std::env::var(ENV_ENDPOINT).unwrap_or_default())
            .api_key(std::env::var(ENV_API_KEY).unwrap_or_default());

        if let Ok(model) = std::env::var(ENV_MODEL) {
            builder = builder.model(model);
        }
        if let Ok(raw) = std::env::var(ENV_MAX_TOKENS) {
            let max_tokens = raw.trim().parse::<u32>().map_err(|e| {
                ChatError::configuration(format!("Invalid {ENV_MAX_TOKENS} '{raw}': {e}"))
            })?;
            builder = builder.max_tokens(max_tokens);
        }
        if let Ok(raw) = std::env::var(ENV_TEMPERATURE) {
            let temperature = raw.trim().parse::<f32>().map_err(|e| {
                ChatError::configuration(format!("Invalid {ENV_TEMPERATURE} '{raw}': {e}"))
            })?;
            builder = builder.temperature(temperature);
        }

        Ok(builder.build())
    }

    /// Check the required fields.
    pub fn validate_config(&self) -> Result<()> {
        self.validate().map_err(|errors| {
            let mut fields: Vec<String> = Vec::new();
            for (field, field_errors) in errors.field_errors() {
                if field == "__all__" {
                    fields.extend(field_errors.iter().filter_map(|error| {
                        error
                            .params
                            .get(FIELD_PARAM)
                            .and_then(|name| name.as_str())
                            .map(str::to_string)
                    }));
                } else {
                    fields.push(field.to_string());
                }
            }
            fields.sort_unstable();
            ChatError::configuration(format!(
                "Configuration error: {} must be set and non-empty",
                fields.join(", ")
            ))
        })
    }
}

/// Builder for [`OrchestratorConfig`].
#[derive(Debug, Default)]
pub struct OrchestratorConfigBuilder {
    endpoint: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    settlement: Option<SettlementTimeouts>,
}

impl OrchestratorConfigBuilder {
    pub fn endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub const fn settlement(mut self, settlement: SettlementTimeouts) -> Self {
        self.settlement = Some(settlement);
        self
    }

    /// Assemble the configuration. Validation happens at orchestrator construction.
    pub fn build(self) -> OrchestratorConfig {
        OrchestratorConfig {
            endpoint: self.endpoint.unwrap_or_default(),
            api_key: SecretString::from(self.api_key.unwrap_or_default()),
            model: self.model.unwrap_or_else(default_model),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            settlement: self.settlement.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn valid_config_passes() {
        let config = OrchestratorConfig::builder()
            .endpoint("https://api.example.com/v1")
            .api_key("sk-test")
            .build();
        assert!(config.validate_config().is_ok());
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.settlement, SettlementTimeouts::default());
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        let config = OrchestratorConfig::builder().api_key("sk-test").build();
        let err = config.validate_config().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.message().contains("endpoint"));
        assert!(!err.message().contains("api_key"));
    }

    #[test]
    fn blank_credential_is_rejected() {
        let config = OrchestratorConfig::builder()
            .endpoint("https://api.example.com/v1")
            .api_key("   ")
            .build();
        let err = config.validate_config().unwrap_err();
        assert!(err.message().contains("api_key"));
    }

    #[test]
    fn both_missing_are_reported_together() {
        let err = OrchestratorConfig::builder()
            .build()
            .validate_config()
            .unwrap_err();
        assert!(err.message().contains("api_key, endpoint"));
    }

    #[test]
    fn credential_error_is_reported_by_field_name() {
        let config = OrchestratorConfig::builder()
            .endpoint("https://api.example.com/v1")
            .build();
        let errors = config.validate().unwrap_err();
        let all = errors.field_errors();
        let credential = &all["__all__"][0];
        assert_eq!(credential.code, "blank");
        assert_eq!(credential.params[FIELD_PARAM], "api_key");

        let err = config.validate_config().unwrap_err();
        assert_eq!(
            err.message(),
            "Configuration error: api_key must be set and non-empty"
        );
    }

    #[test]
    fn debug_output_redacts_credential() {
        let config = OrchestratorConfig::builder()
            .endpoint("https://api.example.com/v1")
            .api_key("sk-very-secret")
            .build();
        assert!(!format!("{config:?}").contains("sk-very-secret"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: OrchestratorConfig = serde_json::from_value(serde_json::json!({
            "endpoint": "http://localhost:8080/v1",
            "api_key": "k",
            "temperature": 0.2
        }))
        .expect("deserialize");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.settlement.text, Duration::from_secs(30));
        assert!(config.validate_config().is_ok());
    }
}
