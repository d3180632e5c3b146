//! Logging subscriber setup
//!
//! The library itself only emits `tracing` events. Binaries embedding it can
//! install a subscriber here instead of wiring `tracing-subscriber` by hand.
//!
//! ```rust,no_run
//! use chatrelay::telemetry::{OutputFormat, SubscriberConfig, init_subscriber};
//!
//! let config = SubscriberConfig::builder()
//!     .log_level(tracing::Level::DEBUG)
//!     .output_format(OutputFormat::Json)
//!     .build();
//! let _guard = init_subscriber(config)?;
//! # Ok::<(), chatrelay::telemetry::TelemetryError>(())
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log level.
pub const ENV_LOG_LEVEL: &str = "CHATRELAY_LOG_LEVEL";
/// Environment variable selecting the output format.
pub const ENV_LOG_FORMAT: &str = "CHATRELAY_LOG_FORMAT";
/// Environment variable naming a log file.
pub const ENV_LOG_FILE: &str = "CHATRELAY_LOG_FILE";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid log level: {0}. Valid options: trace, debug, info, warn, error")]
    InvalidLevel(String),
    #[error("Invalid log format: {0}. Valid options: text, json, json-compact")]
    InvalidFormat(String),
    #[error("Invalid log file path: {}", .0.display())]
    InvalidFile(PathBuf),
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    Json,
    /// Single-line JSON without span lists
    JsonCompact,
}

impl std::str::FromStr for OutputFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "json-compact" => Ok(Self::JsonCompact),
            _ => Err(TelemetryError::InvalidFormat(s.to_string())),
        }
    }
}

/// Configuration for the tracing subscriber
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub log_level: tracing::Level,
    pub output_format: OutputFormat,
    /// Write to a file instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            output_format: OutputFormat::Text,
            log_file: None,
        }
    }
}

impl SubscriberConfig {
    pub fn builder() -> SubscriberConfigBuilder {
        SubscriberConfigBuilder::default()
    }

    /// Debug-level text output
    pub fn debug() -> Self {
        Self {
            log_level: tracing::Level::DEBUG,
            ..Self::default()
        }
    }

    /// Warn-level JSON written to `log_file`
    pub fn production(log_file: PathBuf) -> Self {
        Self {
            log_level: tracing::Level::WARN,
            output_format: OutputFormat::Json,
            log_file: Some(log_file),
        }
    }

    /// Filter directive limiting output to this crate.
    pub fn filter_directive(&self) -> String {
        format!(
            "chatrelay={}",
            self.log_level.as_str().to_ascii_lowercase()
        )
    }
}

/// Builder for [`SubscriberConfig`]
#[derive(Debug, Default)]
pub struct SubscriberConfigBuilder {
    log_level: Option<tracing::Level>,
    output_format: Option<OutputFormat>,
    log_file: Option<PathBuf>,
}

impl SubscriberConfigBuilder {
    pub fn log_level(mut self, level: tracing::Level) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Set the log level from a string such as `"debug"`.
    pub fn log_level_str(mut self, level: &str) -> Result<Self, TelemetryError> {
        let level = level
            .trim()
            .parse::<tracing::Level>()
            .map_err(|_| TelemetryError::InvalidLevel(level.to_string()))?;
        self.log_level = Some(level);
        Ok(self)
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn build(self) -> SubscriberConfig {
        SubscriberConfig {
            log_level: self.log_level.unwrap_or(tracing::Level::INFO),
            output_format: self.output_format.unwrap_or_default(),
            log_file: self.log_file,
        }
    }
}

fn file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard), TelemetryError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| TelemetryError::InvalidFile(path.to_path_buf()))?;
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Install a global subscriber.
///
/// Returns the file writer's guard when `log_file` is set; keep it alive for
/// as long as logs should be flushed. An already-installed global subscriber
/// is left in place and reported as success.
pub fn init_subscriber(config: SubscriberConfig) -> Result<Option<WorkerGuard>, TelemetryError> {
    let filter = EnvFilter::new(config.filter_directive());

    let (writer, guard) = match &config.log_file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    macro_rules! install {
        ($builder:expr) => {
            match writer {
                Some(writer) => $builder.with_ansi(false).with_writer(writer).try_init(),
                None => $builder.try_init(),
            }
        };
    }

    let init_result = match config.output_format {
        OutputFormat::Json => install!(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .json()
        ),
        OutputFormat::JsonCompact => install!(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_span_list(false)
        ),
        OutputFormat::Text => install!(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
        ),
    };

    match init_result {
        Ok(()) => Ok(guard),
        Err(e) => {
            let message = e.to_string();
            // Either the dispatcher or the `log` bridge was installed earlier.
            if message.contains("already been set") || message.contains("already initialized") {
                Ok(guard)
            } else {
                Err(TelemetryError::Init(message))
            }
        }
    }
}

pub fn init_default() -> Result<Option<WorkerGuard>, TelemetryError> {
    init_subscriber(SubscriberConfig::default())
}

pub fn init_debug() -> Result<Option<WorkerGuard>, TelemetryError> {
    init_subscriber(SubscriberConfig::debug())
}

/// Build a configuration from `CHATRELAY_LOG_*` variables.
///
/// - `CHATRELAY_LOG_LEVEL`: trace, debug, info, warn, error
/// - `CHATRELAY_LOG_FORMAT`: text, json, json-compact
/// - `CHATRELAY_LOG_FILE`: log file path
pub fn config_from_env() -> Result<SubscriberConfig, TelemetryError> {
    config_from_lookup(|key| std::env::var(key).ok())
}

fn config_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SubscriberConfig, TelemetryError> {
    let mut builder = SubscriberConfig::builder();
    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        builder = builder.log_level_str(&level)?;
    }
    if let Some(format) = lookup(ENV_LOG_FORMAT) {
        builder = builder.output_format(format.parse()?);
    }
    if let Some(path) = lookup(ENV_LOG_FILE).filter(|p| !p.trim().is_empty()) {
        builder = builder.log_file(path);
    }
    Ok(builder.build())
}

/// Install a subscriber configured from the environment.
pub fn init_from_env() -> Result<Option<WorkerGuard>, TelemetryError> {
    init_subscriber(config_from_env()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn env_config_parses_all_variables() {
        let config = config_from_lookup(lookup(&[
            (ENV_LOG_LEVEL, "DEBUG"),
            (ENV_LOG_FORMAT, "json-compact"),
            (ENV_LOG_FILE, "/tmp/chatrelay.log"),
        ]))
        .unwrap();

        assert_eq!(config.log_level, tracing::Level::DEBUG);
        assert_eq!(config.output_format, OutputFormat::JsonCompact);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/chatrelay.log")));
        assert_eq!(config.filter_directive(), "chatrelay=debug");
    }

    #[test]
    fn env_config_defaults_when_unset() {
        let config = config_from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.log_level, tracing::Level::INFO);
        assert_eq!(config.output_format, OutputFormat::Text);
        assert!(config.log_file.is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = config_from_lookup(lookup(&[(ENV_LOG_LEVEL, "loud")])).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidLevel(_)));

        let err = config_from_lookup(lookup(&[(ENV_LOG_FORMAT, "xml")])).unwrap_err();
        assert!(err.to_string().contains("text, json, json-compact"));
    }
}
