//! Structured errors, serializable so the CLI can print them as JSON

use serde::{Deserialize, Serialize};
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Operation not valid in the current state (recording twice, appending to a sealed log)
    InvalidState,
    /// Persisted recording failed structural or ordering validation
    MalformedLog,
    /// Target capability unreachable or returned unusable data
    ResolutionFailed,
    /// Capability answered, but nothing met the found/confidence bar
    TargetNotFound,
    InvalidSpeed,
    /// Pointer parked in the failsafe corner, or a stop was requested
    AbortedByUser,
    InvalidQuery,
    CaptureFailed,
    InputFailed,
    ConfigInvalid,
    Io,
    Unknown,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            suggestions: Vec::new(),
            context: None,
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message)
    }

    pub fn already_recording() -> Self {
        Self::invalid_state("Recorder is already recording").with_suggestions(vec![
            "Stop the current session before starting a new one".to_string(),
        ])
    }

    pub fn not_recording() -> Self {
        Self::invalid_state("Recorder is not recording")
    }

    pub fn log_sealed() -> Self {
        Self::invalid_state("Event log is sealed; no further events can be appended")
    }

    pub fn listener_busy() -> Self {
        Self::invalid_state("Another recorder already owns the input listener")
    }

    pub fn malformed_log(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedLog, format!("Malformed recording: {}", reason.into()))
    }

    pub fn resolution_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ResolutionFailed,
            format!("Target resolution failed: {}", reason.into()),
        )
    }

    pub fn target_not_found(query: &str, confidence: f64, description: Option<&str>) -> Self {
        Self::new(
            ErrorCode::TargetNotFound,
            format!("Target not found: {} (best confidence {:.2})", query, confidence),
        )
        .with_context(serde_json::json!({
            "confidence": confidence,
            "description": description,
        }))
    }

    pub fn invalid_speed(speed: f64) -> Self {
        Self::new(
            ErrorCode::InvalidSpeed,
            format!("Playback speed must be a positive number, got {}", speed),
        )
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::AbortedByUser, format!("Aborted: {}", reason.into()))
    }

    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidQuery, reason)
    }

    pub fn capture_failed(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::CaptureFailed, format!("Screen capture failed: {}", reason.into()))
    }

    pub fn input_failed(action: &str, reason: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InputFailed, format!("{} failed: {}", action, reason))
            .with_suggestions(vec![
                "Grant accessibility / input permissions to the terminal".to_string(),
            ])
    }

    pub fn config_invalid(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalid, format!("Invalid configuration: {}", reason.into()))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        // Keep the code if an Error travelled through anyhow
        match e.downcast::<Error>() {
            Ok(inner) => inner,
            Err(e) => Self::new(ErrorCode::Unknown, format!("{:#}", e)),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorCode::Io, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorCode::Unknown, e.to_string())
    }
}
