//! Error types for rivulet-core

use thiserror::Error;

/// Main error type for the rivulet-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport error (connection lost/failed)
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected wire event
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Chat API error
    #[error("chat API error: {0}")]
    Api(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// No model could be resolved for a generation request
    #[error("no model available for task '{task}'")]
    ModelResolution { task: String },

    /// Chat not found
    #[error("chat not found: {0}")]
    ChatNotFound(String),

    /// Message not found
    #[error("message not found: {0}")]
    MessageNotFound(String),
}

/// Result type alias for rivulet-core
pub type Result<T> = std::result::Result<T, Error>;
