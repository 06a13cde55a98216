//! Voice-activity events.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadEventKind {
    /// The user started speaking (after debounce).
    Start,
    /// The user stopped speaking.
    Stop,
}

/// A speech start/stop edge raised by the voice-activity monitor.
///
/// `timestamp` is the offset into the microphone stream since the monitor was
/// armed, measured in audio time rather than wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceActivityEvent {
    pub kind: VadEventKind,
    pub timestamp: Duration,
    pub energy_level: f32,
}
