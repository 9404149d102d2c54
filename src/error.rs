//! Error handling module for the hosted engine page
//!
//! Every failure the deployment pipeline can report is a `DeployError`. The
//! orchestrator matches on `kind()` to decide how it is shown to the user;
//! nothing here terminates the process.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification used by the orchestrator to pick a dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or ambiguous user input, re-shown to the user
    InvalidRequest,
    /// HTTP non-200 or connection failure while fetching an image
    NetworkFailure,
    /// Image content matched neither an ISO nor a known archive
    UnrecognizedImageFormat,
    /// Hand-off file vanished before the session was launched
    MissingConfig,
    /// HA daemon could not be queried
    HaDaemonUnreachable,
    /// Rejected configuration value
    Validation,
    /// Local filesystem failure
    Io,
    /// Detachable session could not be started
    Session,
    /// Settings file could not be loaded
    Config,
    /// Anything else; shown as "check the logs"
    Internal,
}

/// Main error type for the deployment pipeline
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Download failed: {0}")]
    NetworkFailure(String),

    #[error("Unrecognized image format: {0}")]
    UnrecognizedImageFormat(String),

    #[error("Deployment configuration {} is missing", .0.display())]
    MissingConfig(PathBuf),

    #[error("HA daemon unreachable: {0}")]
    HaDaemonUnreachable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkFailure(msg.into())
    }

    pub fn unrecognized_image(msg: impl Into<String>) -> Self {
        Self::UnrecognizedImageFormat(msg.into())
    }

    pub fn ha_unreachable(msg: impl Into<String>) -> Self {
        Self::HaDaemonUnreachable(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error for display purposes
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::NetworkFailure(_) => ErrorKind::NetworkFailure,
            Self::UnrecognizedImageFormat(_) => ErrorKind::UnrecognizedImageFormat,
            Self::MissingConfig(_) => ErrorKind::MissingConfig,
            Self::HaDaemonUnreachable(_) => ErrorKind::HaDaemonUnreachable,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Io(_) => ErrorKind::Io,
            Self::Session(_) => ErrorKind::Session,
            Self::Config(_) | Self::Json(_) => ErrorKind::Config,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Text shown to the user. Errors without a useful user-facing message
    /// point at the log file instead.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::MissingConfig | ErrorKind::Internal => {
                "Hosted engine setup failed, please check the logs".to_string()
            }
            _ => self.to_string(),
        }
    }
}
