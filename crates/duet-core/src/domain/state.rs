//! The conversation state enum.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current state of the conversation.
///
/// Exactly one value holds at any instant. Every component may read it; only
/// the turn state machine writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TurnState {
    /// Nothing happening; waiting for explicit user action.
    Idle,

    /// Recognizer running in wake-word mode.
    WakeListening,

    /// Capturing a user utterance (or the user is typing).
    Listening,

    /// Waiting for the first response token from the model.
    Processing,

    /// Assistant reply is streaming and being spoken.
    Speaking,

    /// The user barged in; the reply is being torn down.
    Interrupted,
}

impl TurnState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::WakeListening => "wakeListening",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
