//! Speech synthesis sessions.
//!
//! The coordinator owns at most one live [`SynthesisSession`]. Each session
//! gets one worker task that speaks its chunks strictly one at a time, so
//! audio order always matches submission order. Cancellation is a hard
//! gate: the session id stops matching immediately and the worker observes a
//! [`CancellationToken`] at every resumption point.
//!
//! When a backend refuses a chunk, the worker moves to the next configured
//! backend and retries the same chunk there. When playback breaks after a
//! chunk started, that chunk counts as finished and is not replayed; only the
//! chunks after it go to the next backend. Either way the rest of the session
//! stays on the new backend.

use std::sync::Arc;
use std::time::Duration;

use duet_core::{
    AudioHandle, PortError, SessionEvent, SessionId, SessionOutcome, SessionState, SpeechChunk,
    SpeechStyle, SpeechSynthesizer, SynthesisSession, TurnId,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Ordered list of synthesis backends; index 0 is the primary.
pub type SynthesisBackends = Arc<[Arc<dyn SpeechSynthesizer>]>;

enum WorkItem {
    Speak(SpeechChunk),
    End,
}

struct LiveSession {
    session: SynthesisSession,
    queue: mpsc::UnboundedSender<WorkItem>,
    cancel: CancellationToken,
    last_sequence: u64,
}

/// Owns the active synthesis session.
pub struct SpeechSynthesisCoordinator {
    backends: SynthesisBackends,
    events: mpsc::UnboundedSender<SessionEvent>,
    next_id: u64,
    live: Option<LiveSession>,
}

impl std::fmt::Debug for SpeechSynthesisCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechSynthesisCoordinator")
            .field("backends", &self.backends.len())
            .field("session", &self.active_session())
            .finish_non_exhaustive()
    }
}

impl SpeechSynthesisCoordinator {
    /// Worker reports are delivered on `events`; feed them back through
    /// [`on_session_event`](Self::on_session_event).
    pub fn new(
        backends: Vec<Arc<dyn SpeechSynthesizer>>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            backends: backends.into(),
            events,
            next_id: 1,
            live: None,
        }
    }

    /// The live (active or finishing) session, if any.
    pub fn active_session(&self) -> Option<&SynthesisSession> {
        self.live.as_ref().map(|live| &live.session)
    }

    /// Whether `session_id` is the live session.
    pub fn is_live(&self, session_id: SessionId) -> bool {
        self.active_session()
            .is_some_and(|s| s.session_id == session_id)
    }

    /// Start a session for `turn_id`, canceling any prior one first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn begin_session(&mut self, turn_id: TurnId) -> SessionId {
        self.cancel_active();

        let session_id = SessionId::new(self.next_id);
        self.next_id += 1;

        let (queue, work) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run_session(
            session_id,
            work,
            Arc::clone(&self.backends),
            self.events.clone(),
            cancel.clone(),
        ));

        tracing::info!(session_id = %session_id, turn_id = %turn_id, "Synthesis session started");
        self.live = Some(LiveSession {
            session: SynthesisSession::new(session_id, turn_id),
            queue,
            cancel,
            last_sequence: 0,
        });
        session_id
    }

    /// Queue a chunk for the session. Returns `false` when the chunk was
    /// dropped: the session is no longer accepting chunks, or the sequence
    /// number is not newer than the last accepted one.
    pub fn submit_chunk(&mut self, session_id: SessionId, chunk: SpeechChunk) -> bool {
        let Some(live) = self.live.as_mut().filter(|l| {
            l.session.session_id == session_id && l.session.state == SessionState::Active
        }) else {
            tracing::debug!(
                session_id = %session_id,
                sequence = chunk.sequence_number,
                "Dropping chunk for inactive session"
            );
            return false;
        };

        if chunk.sequence_number <= live.last_sequence {
            tracing::debug!(
                session_id = %session_id,
                sequence = chunk.sequence_number,
                last = live.last_sequence,
                "Dropping stale chunk"
            );
            return false;
        }

        let sequence = chunk.sequence_number;
        if live.queue.send(WorkItem::Speak(chunk)).is_err() {
            tracing::debug!(session_id = %session_id, "Session worker already gone");
            return false;
        }
        live.last_sequence = sequence;
        live.session.chunks_sent += 1;
        tracing::debug!(session_id = %session_id, sequence, "Chunk submitted");
        true
    }

    /// Signal that no more chunks will be submitted. The session completes
    /// once the queued audio finishes.
    pub fn end_session(&mut self, session_id: SessionId) {
        let Some(live) = self.live.as_mut().filter(|l| {
            l.session.session_id == session_id && l.session.state == SessionState::Active
        }) else {
            return;
        };

        // A closed queue means the worker is already ending on its own.
        let _ = live.queue.send(WorkItem::End);
        live.session.state = SessionState::Finishing;
        tracing::debug!(
            session_id = %session_id,
            chunks = live.session.chunks_sent,
            "Session finishing"
        );
    }

    /// Cancel `session_id`. Idempotent: returns `true` only when this call
    /// canceled a live session.
    pub fn cancel(&mut self, session_id: SessionId) -> bool {
        if !self.is_live(session_id) {
            return false;
        }
        self.cancel_active().is_some()
    }

    /// Cancel whatever session is live, returning its final bookkeeping.
    pub fn cancel_active(&mut self) -> Option<SynthesisSession> {
        let live = self.live.take()?;
        live.cancel.cancel();

        let mut session = live.session;
        session.state = SessionState::Canceled;
        tracing::info!(
            session_id = %session.session_id,
            sent = session.chunks_sent,
            acked = session.chunks_acked,
            "Synthesis session canceled"
        );
        Some(session)
    }

    /// Account for a worker report. Returns `false` when the report belongs
    /// to a session that is no longer live and must be ignored.
    pub fn on_session_event(&mut self, event: &SessionEvent) -> bool {
        let session_id = event.session_id();
        let Some(live) = self
            .live
            .as_mut()
            .filter(|l| l.session.session_id == session_id)
        else {
            tracing::debug!(session_id = %session_id, "Ignoring report from stale session");
            return false;
        };

        match event {
            SessionEvent::ChunkStarted { .. } => {}
            SessionEvent::ChunkFinished { .. } => live.session.chunks_acked += 1,
            SessionEvent::BackendFallback { from, to, reason, .. } => {
                tracing::warn!(
                    session_id = %session_id,
                    %from,
                    %to,
                    %reason,
                    "Synthesis backend failed, falling back"
                );
            }
            SessionEvent::SessionEnded { outcome, .. } => {
                let state = match outcome {
                    SessionOutcome::Completed => SessionState::Completed,
                    SessionOutcome::Failed { .. } => SessionState::Canceled,
                };
                live.session.state = state;
                tracing::info!(
                    session_id = %session_id,
                    acked = live.session.chunks_acked,
                    ?state,
                    "Synthesis session ended"
                );
                self.live = None;
            }
        }
        true
    }
}

impl Drop for SpeechSynthesisCoordinator {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            live.cancel.cancel();
        }
    }
}

// ── Session worker ─────────────────────────────────────────────────

enum SpeakError {
    Cancelled,
    /// The backend refused the chunk before any audio played.
    Rejected(PortError),
    /// Playback broke after the chunk was reported as started.
    Interrupted(PortError),
}

async fn run_session(
    session_id: SessionId,
    mut work: mpsc::UnboundedReceiver<WorkItem>,
    backends: SynthesisBackends,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
) {
    let mut backend = 0;

    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            item = work.recv() => item,
        };

        let chunk = match item {
            Some(WorkItem::Speak(chunk)) => chunk,
            Some(WorkItem::End) => break,
            // Coordinator went away without ending the session.
            None => return,
        };

        loop {
            let Some(synth) = backends.get(backend) else {
                let _ = events.send(SessionEvent::SessionEnded {
                    session_id,
                    outcome: SessionOutcome::Failed {
                        message: "no speech synthesis backend available".to_string(),
                    },
                });
                return;
            };

            match speak_chunk(session_id, synth.as_ref(), &chunk, &events, &cancel).await {
                Ok(()) => break,
                Err(SpeakError::Cancelled) => return,
                Err(SpeakError::Rejected(e)) => {
                    if !fall_back(session_id, &backends, &mut backend, &e, &events) {
                        return;
                    }
                }
                Err(SpeakError::Interrupted(e)) => {
                    // Part of this chunk was heard; close it out instead of replaying it.
                    let _ = events.send(SessionEvent::ChunkFinished {
                        session_id,
                        sequence_number: chunk.sequence_number,
                    });
                    if !fall_back(session_id, &backends, &mut backend, &e, &events) {
                        return;
                    }
                    break;
                }
            }
        }
    }

    if !cancel.is_cancelled() {
        let _ = events.send(SessionEvent::SessionEnded {
            session_id,
            outcome: SessionOutcome::Completed,
        });
    }
}

/// Advance to the next backend after `error`. Ends the session as failed and
/// returns `false` when none is left.
fn fall_back(
    session_id: SessionId,
    backends: &SynthesisBackends,
    backend: &mut usize,
    error: &PortError,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> bool {
    let from = backends
        .get(*backend)
        .map(|synth| synth.name().to_string())
        .unwrap_or_default();
    *backend += 1;

    let Some(next) = backends.get(*backend) else {
        tracing::warn!(session_id = %session_id, error = %error, "Every synthesis backend failed");
        let _ = events.send(SessionEvent::SessionEnded {
            session_id,
            outcome: SessionOutcome::Failed {
                message: error.to_string(),
            },
        });
        return false;
    };

    let _ = events.send(SessionEvent::BackendFallback {
        session_id,
        from,
        to: next.name().to_string(),
        reason: error.to_string(),
    });
    true
}

/// Speak one chunk to completion on one backend.
async fn speak_chunk(
    session_id: SessionId,
    synth: &dyn SpeechSynthesizer,
    chunk: &SpeechChunk,
    events: &mpsc::UnboundedSender<SessionEvent>,
    cancel: &CancellationToken,
) -> Result<(), SpeakError> {
    // Nothing reaches the backend once the session is canceled.
    if cancel.is_cancelled() {
        return Err(SpeakError::Cancelled);
    }

    let style = SpeechStyle {
        emotion: chunk.emotion,
        intensity: chunk.emotion_intensity,
    };
    let handle = synth
        .speak(&chunk.normalized_text, style)
        .await
        .map_err(SpeakError::Rejected)?;

    // Audio that started after cancellation is silenced, never reported.
    if cancel.is_cancelled() {
        synth.stop(handle);
        return Err(SpeakError::Cancelled);
    }

    let _ = events.send(SessionEvent::ChunkStarted {
        session_id,
        chunk: chunk.clone(),
        estimated_duration_ms: handle.duration.map(duration_ms),
    });

    wait_or_stop(synth, handle, cancel).await?;

    let _ = events.send(SessionEvent::ChunkFinished {
        session_id,
        sequence_number: chunk.sequence_number,
    });
    Ok(())
}

async fn wait_or_stop(
    synth: &dyn SpeechSynthesizer,
    handle: AudioHandle,
    cancel: &CancellationToken,
) -> Result<(), SpeakError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            synth.stop(handle);
            Err(SpeakError::Cancelled)
        }
        done = synth.wait_until_done(handle) => done.map_err(SpeakError::Interrupted),
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use duet_core::{ChunkKind, Emotion};

    use super::*;

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Fault {
        None,
        Speak,
        Playback,
    }

    /// Synthesizer that "plays" each chunk for a fixed time.
    struct TimedTts {
        name: &'static str,
        play_ms: u64,
        fault: Fault,
        next_id: AtomicU64,
        spoken: Mutex<Vec<String>>,
        stopped: Mutex<Vec<u64>>,
    }

    impl TimedTts {
        fn build(name: &'static str, play_ms: u64, fault: Fault) -> Arc<Self> {
            Arc::new(Self {
                name,
                play_ms,
                fault,
                next_id: AtomicU64::new(1),
                spoken: Mutex::new(Vec::new()),
                stopped: Mutex::new(Vec::new()),
            })
        }

        fn new(name: &'static str, play_ms: u64) -> Arc<Self> {
            Self::build(name, play_ms, Fault::None)
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Self::build(name, 0, Fault::Speak)
        }

        /// Accepts every chunk, then breaks `play_ms` into playback.
        fn breaking(name: &'static str, play_ms: u64) -> Arc<Self> {
            Self::build(name, play_ms, Fault::Playback)
        }

        fn spoken(&self) -> Vec<String> {
            self.spoken.lock().unwrap().clone()
        }

        fn stopped(&self) -> usize {
            self.stopped.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for TimedTts {
        fn name(&self) -> &str {
            self.name
        }

        async fn speak(&self, text: &str, _style: SpeechStyle) -> Result<AudioHandle, PortError> {
            if self.fault == Fault::Speak {
                return Err(PortError::unavailable(self.name, "offline"));
            }
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(AudioHandle {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                duration: Some(Duration::from_millis(self.play_ms)),
            })
        }

        async fn wait_until_done(&self, _handle: AudioHandle) -> Result<(), PortError> {
            tokio::time::sleep(Duration::from_millis(self.play_ms)).await;
            if self.fault == Fault::Playback {
                return Err(PortError::failed(self.name, "audio device lost"));
            }
            Ok(())
        }

        fn stop(&self, handle: AudioHandle) {
            self.stopped.lock().unwrap().push(handle.id);
        }
    }

    fn chunk(seq: u64, text: &str) -> SpeechChunk {
        SpeechChunk {
            text: text.to_string(),
            normalized_text: text.to_string(),
            emotion: Emotion::Neutral,
            emotion_intensity: 0.0,
            sequence_number: seq,
            kind: ChunkKind::Sentence,
        }
    }

    /// Receive events, feeding them to the coordinator, until the live
    /// session ends.
    async fn run_to_end(
        coordinator: &mut SpeechSynthesisCoordinator,
        rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            coordinator.on_session_event(&event);
            let ended = matches!(event, SessionEvent::SessionEnded { .. });
            seen.push(event);
            if ended {
                break;
            }
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_play_in_submission_order() {
        let tts = TimedTts::new("primary", 500);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut coordinator = SpeechSynthesisCoordinator::new(vec![tts.clone()], tx);

        let id = coordinator.begin_session(TurnId::new());
        assert!(coordinator.submit_chunk(id, chunk(1, "first")));
        assert!(coordinator.submit_chunk(id, chunk(2, "second")));
        assert!(coordinator.submit_chunk(id, chunk(3, "third")));
        coordinator.end_session(id);
        assert_eq!(
            coordinator.active_session().map(|s| s.state),
            Some(SessionState::Finishing)
        );

        let events = run_to_end(&mut coordinator, &mut rx).await;
        let started: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::ChunkStarted { chunk, .. } => Some(chunk.sequence_number),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec![1, 2, 3]);
        assert_eq!(tts.spoken(), vec!["first", "second", "third"]);
        assert!(matches!(
            events.last(),
            Some(SessionEvent::SessionEnded {
                outcome: SessionOutcome::Completed,
                ..
            })
        ));
        assert!(coordinator.active_session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_sequence_numbers_are_dropped() {
        let tts = TimedTts::new("primary", 100);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut coordinator = SpeechSynthesisCoordinator::new(vec![tts], tx);

        let id = coordinator.begin_session(TurnId::new());
        assert!(coordinator.submit_chunk(id, chunk(2, "two")));
        assert!(!coordinator.submit_chunk(id, chunk(2, "two again")));
        assert!(!coordinator.submit_chunk(id, chunk(1, "one late")));
        assert_eq!(coordinator.active_session().map(|s| s.chunks_sent), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn new_session_cancels_the_previous_one() {
        let tts = TimedTts::new("primary", 1_000);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut coordinator = SpeechSynthesisCoordinator::new(vec![tts.clone()], tx);

        let a = coordinator.begin_session(TurnId::new());
        coordinator.submit_chunk(a, chunk(1, "from a"));
        coordinator.submit_chunk(a, chunk(2, "more from a"));

        // Let A start its first chunk.
        let started = rx.recv().await.unwrap();
        assert!(coordinator.on_session_event(&started));

        let b = coordinator.begin_session(TurnId::new());
        assert_ne!(a, b);
        assert!(!coordinator.is_live(a));
        assert!(!coordinator.submit_chunk(a, chunk(3, "late from a")));

        assert!(coordinator.submit_chunk(b, chunk(1, "from b")));
        coordinator.end_session(b);

        let events = run_to_end(&mut coordinator, &mut rx).await;
        assert!(events.iter().all(|e| e.session_id() == b));
        assert_eq!(tts.spoken(), vec!["from a", "from b"]);
        assert_eq!(tts.stopped(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_reports_from_canceled_session_are_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut coordinator = SpeechSynthesisCoordinator::new(vec![TimedTts::new("p", 10)], tx);

        let a = coordinator.begin_session(TurnId::new());
        assert!(coordinator.cancel(a));
        assert!(!coordinator.on_session_event(&SessionEvent::ChunkFinished {
            session_id: a,
            sequence_number: 1,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let tts = TimedTts::new("primary", 1_000);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut coordinator = SpeechSynthesisCoordinator::new(vec![tts.clone()], tx);

        let id = coordinator.begin_session(TurnId::new());
        coordinator.submit_chunk(id, chunk(1, "hello"));
        rx.recv().await.unwrap();

        assert!(coordinator.cancel(id));
        assert!(!coordinator.cancel(id));
        assert!(coordinator.cancel_active().is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(tts.stopped(), 1);
        // The canceled worker reports nothing further.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_backend_falls_back_for_rest_of_session() {
        let primary = TimedTts::failing("primary");
        let backup = TimedTts::new("backup", 100);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut coordinator =
            SpeechSynthesisCoordinator::new(vec![primary.clone(), backup.clone()], tx);

        let id = coordinator.begin_session(TurnId::new());
        coordinator.submit_chunk(id, chunk(1, "one"));
        coordinator.submit_chunk(id, chunk(2, "two"));
        coordinator.end_session(id);

        let events = run_to_end(&mut coordinator, &mut rx).await;
        let fallbacks = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::BackendFallback { .. }))
            .count();
        assert_eq!(fallbacks, 1);
        assert_eq!(backup.spoken(), vec!["one", "two"]);
        assert!(primary.spoken().is_empty());
        assert!(matches!(
            events.last(),
            Some(SessionEvent::SessionEnded {
                outcome: SessionOutcome::Completed,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn broken_playback_moves_on_without_replaying_the_chunk() {
        let primary = TimedTts::breaking("primary", 500);
        let backup = TimedTts::new("backup", 100);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut coordinator =
            SpeechSynthesisCoordinator::new(vec![primary.clone(), backup.clone()], tx);

        let id = coordinator.begin_session(TurnId::new());
        coordinator.submit_chunk(id, chunk(1, "one"));
        coordinator.submit_chunk(id, chunk(2, "two"));
        coordinator.end_session(id);

        let events = run_to_end(&mut coordinator, &mut rx).await;
        let started: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::ChunkStarted { chunk, .. } => Some(chunk.sequence_number),
                _ => None,
            })
            .collect();
        let finished: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::ChunkFinished {
                    sequence_number, ..
                } => Some(*sequence_number),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec![1, 2]);
        assert_eq!(finished, vec![1, 2]);
        assert_eq!(primary.spoken(), vec!["one"]);
        assert_eq!(backup.spoken(), vec!["two"]);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SessionEvent::BackendFallback { .. }))
                .count(),
            1
        );
        assert!(matches!(
            events.last(),
            Some(SessionEvent::SessionEnded {
                outcome: SessionOutcome::Completed,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn session_fails_when_no_backend_remains() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut coordinator = SpeechSynthesisCoordinator::new(
            vec![TimedTts::failing("primary"), TimedTts::failing("backup")],
            tx,
        );

        let id = coordinator.begin_session(TurnId::new());
        coordinator.submit_chunk(id, chunk(1, "one"));

        let events = run_to_end(&mut coordinator, &mut rx).await;
        assert!(matches!(
            events.last(),
            Some(SessionEvent::SessionEnded {
                outcome: SessionOutcome::Failed { .. },
                ..
            })
        ));
        assert!(coordinator.active_session().is_none());
    }
}
