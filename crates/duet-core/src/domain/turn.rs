//! Conversation turns.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(Uuid);

impl TurnId {
    /// Generate a new random turn ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the underlying UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One utterance in the conversation.
///
/// Once `interrupted` is set it is never cleared, and the text is frozen:
/// [`append_text`](Self::append_text) refuses further writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    id: TurnId,
    role: TurnRole,
    text: String,
    created_at: DateTime<Utc>,
    interrupted: bool,
}

impl ConversationTurn {
    /// A completed user utterance or typed message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: TurnId::new(),
            role: TurnRole::User,
            text: text.into(),
            created_at: Utc::now(),
            interrupted: false,
        }
    }

    /// An assistant reply that is about to start streaming.
    pub fn assistant() -> Self {
        Self {
            id: TurnId::new(),
            role: TurnRole::Assistant,
            text: String::new(),
            created_at: Utc::now(),
            interrupted: false,
        }
    }

    pub const fn id(&self) -> TurnId {
        self.id
    }

    pub const fn role(&self) -> TurnRole {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub const fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// Append streamed text. Returns `false` (and changes nothing) once the
    /// turn has been interrupted.
    pub fn append_text(&mut self, delta: &str) -> bool {
        if self.interrupted {
            return false;
        }
        self.text.push_str(delta);
        true
    }

    /// Mark the turn as interrupted. Idempotent.
    pub const fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_turn_rejects_appends() {
        let mut turn = ConversationTurn::assistant();
        assert!(turn.append_text("Hello"));
        turn.mark_interrupted();
        assert!(!turn.append_text(" world"));
        assert_eq!(turn.text(), "Hello");
        assert!(turn.is_interrupted());
    }

    #[test]
    fn interrupted_flag_is_sticky() {
        let mut turn = ConversationTurn::user("hi");
        turn.mark_interrupted();
        turn.mark_interrupted();
        assert!(turn.is_interrupted());
    }

    #[test]
    fn turn_ids_are_unique() {
        assert_ne!(TurnId::new(), TurnId::new());
    }

    #[test]
    fn turn_serializes_camel_case() {
        let turn = ConversationTurn::user("hello");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["interrupted"], false);
    }
}
