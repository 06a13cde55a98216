//! Speech-synthesis sessions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::turn::TurnId;

/// Identifier of one synthesis session. Allocated monotonically by the
/// coordinator, never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Lifecycle state of a synthesis session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Accepting chunks.
    Active,
    /// No more chunks will be submitted; queued audio is still playing.
    Finishing,
    /// Canceled (barge-in, stop, superseded, or every backend failed).
    Canceled,
    /// All submitted chunks were spoken.
    Completed,
}

impl SessionState {
    /// Whether the session still owns the audio output.
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::Finishing)
    }
}

/// Bookkeeping for one continuous synthesis request for one assistant turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisSession {
    pub session_id: SessionId,
    pub turn_id: TurnId,
    pub state: SessionState,
    pub chunks_sent: u32,
    pub chunks_acked: u32,
}

impl SynthesisSession {
    pub const fn new(session_id: SessionId, turn_id: TurnId) -> Self {
        Self {
            session_id,
            turn_id,
            state: SessionState::Active,
            chunks_sent: 0,
            chunks_acked: 0,
        }
    }
}
