//! Speech recognizer port.

use serde::{Deserialize, Serialize};

use crate::error::PortError;

/// What the recognizer is listening for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListenMode {
    /// Only the wake phrase; reports [`RecognizerEvent::WakeWord`].
    WakeWord,
    /// A full utterance; reports partial and final transcripts.
    Utterance,
}

/// Output of a running recognizer, delivered to the engine through its
/// handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    Partial(String),
    Final(String),
    WakeWord,
    /// Recognition ended without any speech.
    Ended,
    Error { message: String, fatal: bool },
}

/// Speech recognizer.
///
/// `start` and `stop` must return quickly; results flow back asynchronously
/// as [`RecognizerEvent`]s. Calling `stop` on a stopped recognizer is a
/// no-op.
pub trait SpeechRecognizer: Send + Sync {
    fn start(&self, language: &str, mode: ListenMode) -> Result<(), PortError>;
    fn stop(&self);
}
