//! Errors raised by hooks, engines, checkpoints and configuration loading.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by user hooks.
#[derive(Debug, Clone, Error)]
pub enum HookError {
    #[error("Hook {hook} failed: {message}")]
    Failed { hook: String, message: String },
    #[error("Hook {hook} returned {found}, expected {expected}")]
    InvalidOutput {
        hook: String,
        expected: &'static str,
        found: String,
    },
    #[error("Hook {hook} timed out after {timeout:?}")]
    Timeout { hook: String, timeout: Duration },
    #[error("Hook {hook} was cancelled")]
    Cancelled { hook: String },
    #[error("Context key not found: {0}")]
    MissingKey(String),
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl HookError {
    pub fn failed(hook: impl Into<String>, message: impl Into<String>) -> Self {
        HookError::Failed {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by protocol engines.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Engine '{0}' has no wire implementation")]
    Unsupported(String),
    #[error("DNS lookup failed for {host}: {reason}")]
    Dns { host: String, reason: String },
    #[error("Connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },
    #[error("Connection to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    /// The peer closed or reset the connection before sending any response byte.
    #[error("Connection closed before response: {0}")]
    ConnectionClosed(String),
    #[error("Action not prepared: {0}")]
    NotPrepared(String),
    #[error("Connection pool closed")]
    PoolClosed,
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for EngineError {
    fn from(value: std::io::Error) -> Self {
        EngineError::Io(value.to_string())
    }
}

/// Errors raised by checkpoint stores.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CheckpointError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Checkpoint not found: {0}")]
    NotFound(String),
    #[error("Checkpoint corrupted: {0}")]
    Corrupted(String),
}

/// Errors raised while loading configuration and program files.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },
    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },
    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),
    #[error("Invalid duration '{0}'")]
    InvalidDuration(String),
    #[error("Invalid log level '{0}', expected one of trace, debug, info, warn, error, critical")]
    InvalidLogLevel(String),
    #[error("Unknown graph '{0}': not a file and not registered in the configuration")]
    UnknownGraph(String),
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Errors raised by reporters while submitting a run's output.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReporterError {
    #[error("Reporter {reporter} is not connected")]
    NotConnected { reporter: String },
    #[error("Unknown reporter plugin '{0}'")]
    UnknownPlugin(String),
    #[error("Reporter {reporter} failed: {message}")]
    Submit { reporter: String, message: String },
}
