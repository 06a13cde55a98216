//! Speech synthesis backend port.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::Emotion;
use crate::error::PortError;

/// Delivery hints for one synthesis request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechStyle {
    pub emotion: Emotion,
    pub intensity: f32,
}

/// Handle to audio that a backend has started playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioHandle {
    pub id: u64,
    /// Playback length, when the backend knows it.
    pub duration: Option<Duration>,
}

/// Text-to-speech backend that owns the audio output while playing.
///
/// Implementations must be `Send + Sync` so that session workers can hold
/// them behind an `Arc` across `.await` points.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Short backend name for logs and fallback notices.
    fn name(&self) -> &str;

    /// Synthesize `text` and start playing it.
    async fn speak(&self, text: &str, style: SpeechStyle) -> Result<AudioHandle, PortError>;

    /// Resolve once the audio behind `handle` has finished playing.
    async fn wait_until_done(&self, handle: AudioHandle) -> Result<(), PortError>;

    /// Stop playback immediately. Unknown or finished handles are ignored.
    fn stop(&self, handle: AudioHandle);
}
