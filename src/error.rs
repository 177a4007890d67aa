//! Error types for the telephony audio pipeline

use thiserror::Error;
use uuid::Uuid;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Terminal conditions of a playback session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Acknowledgment for mark {mark} arrived with no audio in flight")]
    OrphanAcknowledgment { mark: String },

    #[error("Acknowledgment for mark {received} does not match oldest in-flight chunk {expected}")]
    MarkMismatch { expected: Uuid, received: String },

    #[error("Failed to encode frame: {0}")]
    Encode(String),

    #[error("Playback session is closed")]
    SessionClosed,
}

impl PipelineError {
    /// Whether this error means the remote endpoint and the in-flight queue disagree
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            PipelineError::OrphanAcknowledgment { .. } | PipelineError::MarkMismatch { .. }
        )
    }
}

/// Speech synthesis provider errors
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Provider returned {status} status code")]
    Status { status: u16 },

    #[error("Provider request timed out")]
    Timeout,

    #[error("Provider request failed: {0}")]
    Request(String),

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Provider returned no audio")]
    EmptyAudio,
}

impl From<reqwest::Error> for SynthesisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SynthesisError::Timeout
        } else if let Some(status) = err.status() {
            SynthesisError::Status { status: status.as_u16() }
        } else {
            SynthesisError::Request(err.to_string())
        }
    }
}

/// Media stream transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Stream closed before start event")]
    ClosedBeforeStart,
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
