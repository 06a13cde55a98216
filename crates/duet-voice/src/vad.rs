//! Barge-in voice activity detection.
//!
//! [`EnergyDetector`] is the synchronous core: a rolling RMS energy average
//! with a start debounce and an immediate stop. [`VoiceActivityMonitor`]
//! runs the detector over live microphone frames on a spawned task and
//! broadcasts the resulting events.
//!
//! The monitor is only armed while the assistant is speaking, so the
//! microphone is never shared with the recognizer.

use std::time::Duration;

use duet_core::{
    AudioFrame, EngineError, MicrophoneSource, PortError, VadEventKind, VadSettings,
    VoiceActivityEvent,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Capacity of the event broadcast channel. Events are rare edges, so a
/// small buffer is plenty.
const EVENT_CAPACITY: usize = 16;

/// Energy-threshold speech detector.
#[derive(Debug, Clone)]
pub struct EnergyDetector {
    threshold: f32,
    debounce: Duration,
    smoothing: f32,
    /// Rolling RMS average.
    energy: f32,
    /// Continuous audio time spent above the threshold.
    above_for: Duration,
    speaking: bool,
    /// Audio time processed since the last reset.
    elapsed: Duration,
}

impl EnergyDetector {
    pub fn new(settings: &VadSettings) -> Self {
        Self {
            threshold: settings.energy_threshold,
            debounce: Duration::from_millis(settings.debounce_ms),
            smoothing: settings.smoothing.clamp(f32::EPSILON, 1.0),
            energy: 0.0,
            above_for: Duration::ZERO,
            speaking: false,
            elapsed: Duration::ZERO,
        }
    }

    /// Feed one frame. Returns an event on a start or stop edge.
    pub fn process_frame(&mut self, frame: &AudioFrame) -> Option<VoiceActivityEvent> {
        self.elapsed += frame.duration;

        let rms = calculate_rms_energy(&frame.samples);
        self.energy = self.smoothing.mul_add(rms - self.energy, self.energy);

        if self.energy > self.threshold {
            self.above_for += frame.duration;
            if !self.speaking && self.above_for >= self.debounce {
                self.speaking = true;
                tracing::debug!(
                    energy = self.energy,
                    after_ms = self.above_for.as_millis(),
                    "VAD: speech started"
                );
                return Some(self.event(VadEventKind::Start));
            }
        } else {
            // Dropping below the threshold ends a run immediately.
            self.above_for = Duration::ZERO;
            if self.speaking {
                self.speaking = false;
                tracing::debug!(energy = self.energy, "VAD: speech stopped");
                return Some(self.event(VadEventKind::Stop));
            }
        }

        None
    }

    /// Forget all history; timestamps restart at zero.
    pub const fn reset(&mut self) {
        self.energy = 0.0;
        self.above_for = Duration::ZERO;
        self.speaking = false;
        self.elapsed = Duration::ZERO;
    }

    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Current smoothed energy.
    pub const fn energy(&self) -> f32 {
        self.energy
    }

    const fn event(&self, kind: VadEventKind) -> VoiceActivityEvent {
        VoiceActivityEvent {
            kind,
            timestamp: self.elapsed,
            energy_level: self.energy,
        }
    }
}

/// Calculate RMS (Root Mean Square) energy of an audio frame.
fn calculate_rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|&s| s * s).sum();

    #[allow(clippy::cast_precision_loss)]
    let mean = sum_squares / samples.len() as f32;

    mean.sqrt()
}

/// Runs an [`EnergyDetector`] over a microphone stream.
///
/// Events go to every [`subscribe`](Self::subscribe)r. A refused microphone
/// latches barge-in off until [`reset_capability`](Self::reset_capability).
pub struct VoiceActivityMonitor {
    settings: VadSettings,
    events: broadcast::Sender<VoiceActivityEvent>,
    cancel: Option<CancellationToken>,
    capability_denied: bool,
}

impl std::fmt::Debug for VoiceActivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceActivityMonitor")
            .field("armed", &self.is_armed())
            .field("capability_denied", &self.capability_denied)
            .finish_non_exhaustive()
    }
}

impl VoiceActivityMonitor {
    pub fn new(settings: VadSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            settings,
            events,
            cancel: None,
            capability_denied: false,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceActivityEvent> {
        self.events.subscribe()
    }

    /// Open the microphone and start detecting.
    ///
    /// A no-op while already armed or after the microphone was refused.
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, mic: &dyn MicrophoneSource) -> Result<(), EngineError> {
        if self.capability_denied {
            tracing::debug!("Barge-in disabled, ignoring VAD start");
            return Ok(());
        }
        if self.is_armed() {
            return Ok(());
        }

        let frames = match mic.open() {
            Ok(frames) => frames,
            Err(PortError::PermissionDenied(reason)) => {
                tracing::warn!(%reason, "Microphone refused, barge-in disabled");
                self.capability_denied = true;
                return Err(EngineError::CapabilityDenied(reason));
            }
            Err(e) => return Err(e.into()),
        };

        let cancel = CancellationToken::new();
        let detector = EnergyDetector::new(&self.settings);
        tokio::spawn(run_detector(frames, detector, self.events.clone(), cancel.clone()));
        self.cancel = Some(cancel);

        tracing::debug!("VAD armed");
        Ok(())
    }

    /// Stop detecting and release the microphone. Idempotent.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
            tracing::debug!("VAD disarmed");
        }
    }

    pub const fn is_armed(&self) -> bool {
        self.cancel.is_some()
    }

    /// Whether a refused microphone has disabled barge-in.
    pub const fn is_disabled(&self) -> bool {
        self.capability_denied
    }

    /// Clear the denial latch so the next `start` asks for the microphone
    /// again.
    pub const fn reset_capability(&mut self) {
        self.capability_denied = false;
    }
}

impl Drop for VoiceActivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_detector(
    mut frames: tokio::sync::mpsc::Receiver<AudioFrame>,
    mut detector: EnergyDetector,
    events: broadcast::Sender<VoiceActivityEvent>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = frames.recv() => frame,
        };

        let Some(frame) = frame else {
            tracing::debug!("Microphone stream closed");
            break;
        };

        if let Some(event) = detector.process_frame(&frame) {
            // No subscribers is fine: nobody is waiting for a barge-in.
            let _ = events.send(event);
        }
    }
}
