//! Error taxonomy shared by the engine and its adapters.

use std::fmt;

use serde::{Deserialize, Serialize};

/// User-facing error classes.
///
/// Only [`RepeatedFailure`](Self::RepeatedFailure) interrupts the
/// conversation loop; every other kind is reported and the loop carries on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Empty or garbled transcript; the user is asked to try again.
    RecoverableInput,

    /// A recognition, synthesis or model backend failed. The engine falls
    /// back to an alternate backend or degrades to text-only.
    BackendUnavailable,

    /// The recognizer failed too many times in a row. Requires explicit
    /// acknowledgement before voice input resumes.
    RepeatedFailure,

    /// Microphone permission refused. Voice features are disabled; typed
    /// input keeps working.
    CapabilityDenied,

    /// An event arrived for a canceled session or turn. Logged at debug
    /// level only, never surfaced.
    CancellationRace,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RecoverableInput => "recoverableInput",
            Self::BackendUnavailable => "backendUnavailable",
            Self::RepeatedFailure => "repeatedFailure",
            Self::CapabilityDenied => "capabilityDenied",
            Self::CancellationRace => "cancellationRace",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by external collaborators (recognizer, LLM, synthesizer,
/// animation player, microphone).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    /// The backend is down or unreachable.
    #[error("{backend} unavailable: {message}")]
    Unavailable { backend: String, message: String },

    /// The operation was attempted and failed.
    #[error("{backend} failed: {message}")]
    Failed { backend: String, message: String },

    /// The user or OS refused access to a device.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backend does not support the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The operation was aborted by a cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

impl PortError {
    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn failed(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Map a port failure onto the user-facing taxonomy.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied(_) => ErrorKind::CapabilityDenied,
            Self::Cancelled => ErrorKind::CancellationRace,
            Self::Unavailable { .. } | Self::Failed { .. } | Self::Unsupported(_) => {
                ErrorKind::BackendUnavailable
            }
        }
    }
}

/// Errors returned by the engine to its callers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Microphone (or another device) access was refused.
    #[error("capability denied: {0}")]
    CapabilityDenied(String),

    /// A collaborator failed.
    #[error(transparent)]
    Port(#[from] PortError),

    /// The engine loop has shut down; commands can no longer be delivered.
    #[error("conversation engine is not running")]
    NotRunning,

    /// Voice input is halted after repeated recognizer failures.
    #[error("voice input halted after repeated failures; acknowledge to resume")]
    Halted,

    /// Invalid settings.
    #[error(transparent)]
    Settings(#[from] crate::settings::SettingsError),
}

impl EngineError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CapabilityDenied(_) => ErrorKind::CapabilityDenied,
            Self::Port(e) => e.kind(),
            Self::Halted => ErrorKind::RepeatedFailure,
            Self::NotRunning | Self::Settings(_) => ErrorKind::BackendUnavailable,
        }
    }
}
