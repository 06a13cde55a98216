//! Speakable chunks of assistant text.

use serde::{Deserialize, Serialize};

use super::emotion::Emotion;

/// Why the accumulator cut a chunk where it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Ended at a sentence terminator.
    Sentence,
    /// Cut at a word boundary because the text ran long without punctuation.
    Fallback,
    /// Remainder emitted when the stream ended.
    Final,
}

/// A contiguous, speakable slice of one assistant turn.
///
/// Immutable once created. `sequence_number` starts at 1 and strictly
/// increases within a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechChunk {
    /// Raw text as generated (trimmed).
    pub text: String,
    /// Text cleaned for speech synthesis.
    pub normalized_text: String,
    pub emotion: Emotion,
    pub emotion_intensity: f32,
    pub sequence_number: u64,
    pub kind: ChunkKind,
}

impl SpeechChunk {
    /// Number of characters that will actually be spoken.
    pub fn spoken_chars(&self) -> usize {
        self.normalized_text.chars().count()
    }
}
