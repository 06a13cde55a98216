//! Microphone port used by the voice-activity monitor.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::PortError;

/// One frame of mono PCM audio. `duration` is the audio time the frame
/// covers, so consumers never need the sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub duration: Duration,
}

impl AudioFrame {
    pub const fn new(samples: Vec<f32>, duration: Duration) -> Self {
        Self { samples, duration }
    }
}

/// Source of live microphone frames.
pub trait MicrophoneSource: Send + Sync {
    /// Open the device and start delivering frames. Returns
    /// [`PortError::PermissionDenied`] when the user refused access. Dropping
    /// the receiver releases the device.
    fn open(&self) -> Result<mpsc::Receiver<AudioFrame>, PortError>;
}
