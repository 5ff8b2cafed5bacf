use std::time::Duration;
use thiserror::Error;

/// Errors produced while querying or parsing an external tool
///
/// Every variant is recoverable: the affected device (or the whole cycle, for
/// listing failures) is skipped and sampling carries on.
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("{tool} unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("{tool} timed out after {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration },

    #[error("Failed to parse {context}: {reason}")]
    ParseFailure { context: String, reason: String },

    #[error("Device {device} dropped, {query} query failed: {source}")]
    PartialDevice {
        device: String,
        query: String,
        #[source]
        source: Box<SampleError>,
    },
}

impl SampleError {
    pub(crate) fn unavailable(tool: impl Into<String>, reason: impl ToString) -> Self {
        Self::ToolUnavailable {
            tool: tool.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn parse(context: impl Into<String>, reason: impl ToString) -> Self {
        Self::ParseFailure {
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors that can occur when publishing an encoded artifact
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to replace {target}: {source}")]
    Persist {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that end a sampling cycle early
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Cycle panicked: {0}")]
    Panicked(String),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
