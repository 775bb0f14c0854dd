//! Error taxonomy for the robovac agent
//!
//! Decode failures never leave the component that hit them (callers see
//! "unknown" or a skipped packet). Everything else is surfaced through
//! [`RobovacError`] and caught at the session boundary.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RobovacError>;

#[derive(Debug, Error)]
pub enum RobovacError {
    #[error("Decode failure: {0}")]
    Decode(String),

    #[error("Could not bind discovery port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Unrecognized {kind}: {value}")]
    UnrecognizedInput { kind: &'static str, value: String },

    #[error("{intent} failed at step {step} of {total}: {source}")]
    PartialSequence {
        intent: String,
        step: usize,
        total: usize,
        #[source]
        source: Box<RobovacError>,
    },

    #[error("Device session closed")]
    SessionClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RobovacError {
    pub fn transport(message: impl Into<String>) -> Self {
        RobovacError::Transport(message.into())
    }

    pub fn unrecognized(kind: &'static str, value: impl Into<String>) -> Self {
        RobovacError::UnrecognizedInput {
            kind,
            value: value.into(),
        }
    }

    /// Whether the condition can clear up on its own (next poll, next window).
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            RobovacError::Config(_) | RobovacError::UnrecognizedInput { .. }
        )
    }

    /// Stable short code used in command responses.
    pub fn kind(&self) -> &'static str {
        match self {
            RobovacError::Decode(_) => "decode_failure",
            RobovacError::Bind { .. } => "bind_failure",
            RobovacError::Transport(_) => "transport_failure",
            RobovacError::UnrecognizedInput { .. } => "unrecognized_input",
            RobovacError::PartialSequence { .. } => "partial_sequence_failure",
            RobovacError::SessionClosed => "session_closed",
            RobovacError::Config(_) => "config_error",
            RobovacError::Io(_) => "io_error",
            RobovacError::Json(_) => "json_error",
        }
    }
}
