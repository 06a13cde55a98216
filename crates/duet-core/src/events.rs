//! Events published by the engine and reported by synthesis sessions.

use serde::{Deserialize, Serialize};

use crate::domain::{SessionId, SpeechChunk, TurnId, TurnState};
use crate::error::ErrorKind;

/// Events the engine publishes to the UI / application layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// Conversation state changed.
    StateChanged { state: TurnState },

    /// Recognizer output for the current utterance.
    #[serde(rename_all = "camelCase")]
    Transcript { text: String, is_final: bool },

    /// A piece of streamed assistant text.
    #[serde(rename_all = "camelCase")]
    AssistantTextDelta { turn_id: TurnId, text: String },

    /// The first chunk of a reply started playing.
    SpeakingStarted,

    /// Playback for the reply ended (completed, canceled or failed).
    SpeakingFinished,

    /// A reportable error. `fatal` errors stay visible until acknowledged.
    Error {
        kind: ErrorKind,
        message: String,
        fatal: bool,
    },
}

impl EngineEvent {
    pub const fn state_changed(state: TurnState) -> Self {
        Self::StateChanged { state }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>, fatal: bool) -> Self {
        Self::Error {
            kind,
            message: message.into(),
            fatal,
        }
    }
}

/// How a synthesis session ended, as reported by its worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SessionOutcome {
    /// Every submitted chunk was spoken.
    Completed,
    /// No synthesis backend could speak the remaining chunks.
    Failed { message: String },
}

/// Lifecycle reports from a synthesis session worker.
///
/// The coordinator accepts these only while `session_id` is the live
/// session; anything else is a cancellation race and is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// Audio for a chunk started playing.
    #[serde(rename_all = "camelCase")]
    ChunkStarted {
        session_id: SessionId,
        chunk: SpeechChunk,
        /// Timing signal from the synthesis backend, when it has one.
        estimated_duration_ms: Option<u64>,
    },

    /// Audio for a chunk finished playing.
    #[serde(rename_all = "camelCase")]
    ChunkFinished {
        session_id: SessionId,
        sequence_number: u64,
    },

    /// The session switched to an alternate synthesis backend.
    #[serde(rename_all = "camelCase")]
    BackendFallback {
        session_id: SessionId,
        from: String,
        to: String,
        reason: String,
    },

    /// The worker finished.
    #[serde(rename_all = "camelCase")]
    SessionEnded {
        session_id: SessionId,
        outcome: SessionOutcome,
    },
}

impl SessionEvent {
    pub const fn session_id(&self) -> SessionId {
        match self {
            Self::ChunkStarted { session_id, .. }
            | Self::ChunkFinished { session_id, .. }
            | Self::BackendFallback { session_id, .. }
            | Self::SessionEnded { session_id, .. } => *session_id,
        }
    }
}
