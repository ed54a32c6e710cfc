//! Crate-wide error types.
//!
//! [`Error`] is the flat error enum returned by every fallible SDK operation.
//! Server-reported failures map onto dedicated variants so callers can match
//! on the failure kind instead of parsing messages.

use thiserror::Error;

/// Errors surfaced by SDK operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A request field failed a local precondition before being sent.
    #[error("validation error: {0}")]
    Validation(String),

    /// The channel to the terminal is down and the request deadline elapsed.
    #[error("not connected to the terminal")]
    NotConnected,

    /// A deadline expired while waiting for {0}.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The server reported that the requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server rejected the supplied credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The server throttled the request.
    #[error("too many requests: {message}")]
    TooManyRequests {
        message: String,
        /// Seconds after which the request may be retried, when reported.
        retry_after_seconds: Option<u64>,
    },

    /// Unknown server-side failure.
    #[error("internal server error: {0}")]
    Internal(String),

    /// A trade request completed with a failure return code.
    #[error(transparent)]
    Trade(#[from] TradeErrorInfo),

    /// The operation was still pending when the connection was closed.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

/// Failure details of a rejected trade request.
///
/// Carries the server trade return code in both numeric and symbolic form
/// together with the human-readable message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("trade failed with {string_code} ({numeric_code}): {message}")]
pub struct TradeErrorInfo {
    pub numeric_code: i64,
    pub string_code: String,
    pub message: String,
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(toml::de::Error),

    #[error("missing required config field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
