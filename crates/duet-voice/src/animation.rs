//! Avatar animation driven by synthesis session events.
//!
//! One talk animation is triggered per spoken chunk, sized to the audio
//! playing underneath it, and the avatar blends back to idle as soon as the
//! session ends or is canceled. Animation is best-effort: the player is never
//! waited on and its failures never reach the audio path.

use std::sync::Arc;

use duet_core::{AnimationPlayer, AnimationSettings, Emotion, SessionEvent, SessionId, SpeechChunk};

/// Intensity at which the emphasized variant of an animation is used.
const STRONG_INTENSITY: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingTrigger {
    session_id: SessionId,
    sequence_number: u64,
}

/// Turns session lifecycle events into animation player commands.
pub struct AnimationSynchronizer {
    player: Arc<dyn AnimationPlayer>,
    settings: AnimationSettings,
    pending: Option<PendingTrigger>,
}

impl std::fmt::Debug for AnimationSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationSynchronizer")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl AnimationSynchronizer {
    pub fn new(player: Arc<dyn AnimationPlayer>, settings: AnimationSettings) -> Self {
        Self {
            player,
            settings,
            pending: None,
        }
    }

    pub fn on_session_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::ChunkStarted {
                session_id,
                chunk,
                estimated_duration_ms,
            } => self.chunk_started(*session_id, chunk, *estimated_duration_ms),
            SessionEvent::ChunkFinished {
                session_id,
                sequence_number,
            } => {
                let finished = PendingTrigger {
                    session_id: *session_id,
                    sequence_number: *sequence_number,
                };
                if self.pending == Some(finished) {
                    self.pending = None;
                }
            }
            SessionEvent::SessionEnded { session_id, .. } => self.go_idle(*session_id),
            SessionEvent::BackendFallback { .. } => {}
        }
    }

    /// The session was canceled (barge-in, stop, superseded).
    pub fn on_cancel(&mut self, session_id: SessionId) {
        self.go_idle(session_id);
    }

    fn chunk_started(&mut self, session_id: SessionId, chunk: &SpeechChunk, estimate: Option<u64>) {
        if let Some(pending) = self.pending {
            if pending.session_id == session_id {
                tracing::debug!(
                    session_id = %session_id,
                    sequence = chunk.sequence_number,
                    pending = pending.sequence_number,
                    "Animation already pending, dropping trigger"
                );
                return;
            }
        }

        let animation_id = animation_id(chunk.emotion, chunk.emotion_intensity);
        let duration_ms = self.trigger_duration_ms(chunk, estimate);

        self.pending = Some(PendingTrigger {
            session_id,
            sequence_number: chunk.sequence_number,
        });

        if let Err(e) = self.player.trigger(&animation_id, duration_ms) {
            tracing::warn!(
                session_id = %session_id,
                animation = %animation_id,
                error = %e,
                "Animation trigger failed"
            );
        }
    }

    fn go_idle(&mut self, session_id: SessionId) {
        if self.pending.is_some_and(|p| p.session_id != session_id) {
            // A newer session owns the avatar.
            return;
        }
        self.pending = None;

        if let Err(e) = self.player.return_to_idle(self.settings.idle_blend_ms) {
            tracing::warn!(session_id = %session_id, error = %e, "Return to idle failed");
        }
    }

    /// Backend timing when known, otherwise an estimate from the spoken
    /// length clamped to the configured bounds.
    pub fn trigger_duration_ms(&self, chunk: &SpeechChunk, estimate: Option<u64>) -> u64 {
        estimate.unwrap_or_else(|| {
            let chars = u64::try_from(chunk.spoken_chars()).unwrap_or(u64::MAX);
            chars
                .saturating_mul(self.settings.ms_per_char)
                .clamp(self.settings.min_trigger_ms, self.settings.max_trigger_ms)
        })
    }
}

/// `talk` for neutral speech, `talk_<emotion>` otherwise, with a `_strong`
/// suffix for intense delivery.
pub fn animation_id(emotion: Emotion, intensity: f32) -> String {
    if emotion == Emotion::Neutral {
        return "talk".to_string();
    }
    if intensity >= STRONG_INTENSITY {
        format!("talk_{emotion}_strong")
    } else {
        format!("talk_{emotion}")
    }
}
