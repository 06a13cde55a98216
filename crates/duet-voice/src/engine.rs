//! The conversation engine.
//!
//! All component state lives on [`ConversationEngine`] and is only touched
//! from its event loop. Everything asynchronous (the LLM stream, synthesis
//! workers, the barge-in detector, recognizer adapters, user commands) talks
//! to the loop by message: an [`EngineInput`] on the inbox, a
//! [`SessionEvent`] from the coordinator, or a VAD broadcast. The loop feeds
//! each message to the [`TurnStateMachine`] and carries out the actions it
//! returns.

use std::collections::VecDeque;
use std::sync::Arc;

use duet_core::{
    AnimationPlayer, ConversationTurn, EmotionClassifier, EngineError, EngineEvent,
    EngineEventEmitter, EngineSettings, ErrorKind, LlmClient, LlmRequest, MicrophoneSource,
    PortError, RecognizerEvent, SessionEvent, SessionId, SessionOutcome, SpeechRecognizer,
    SpeechSynthesizer, TokenSink, TurnId, TurnState, VadEventKind, VoiceActivityEvent,
    validate_settings,
};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::animation::AnimationSynchronizer;
use crate::chunker::{ChunkAccumulator, StreamBuffer};
use crate::synthesis::SpeechSynthesisCoordinator;
use crate::text_utils::TextNormalizer;
use crate::turn::{InputSource, TurnAction, TurnEvent, TurnStateMachine};
use crate::vad::VoiceActivityMonitor;

/// User-level commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Behave as if the wake word was heard.
    Wake,
    /// Start recording an utterance (push-to-talk).
    StartRecording,
    /// Submit a typed message.
    SubmitText(String),
    Stop,
    /// Clear a latched recognizer halt.
    Acknowledge,
    Shutdown,
}

/// Messages delivered to the engine loop.
#[derive(Debug)]
pub enum EngineInput {
    Command(EngineCommand),
    Recognizer(RecognizerEvent),
    Token {
        turn_id: TurnId,
        text: String,
    },
    StreamFinished {
        turn_id: TurnId,
        result: Result<String, PortError>,
    },
    Session(SessionEvent),
    Vad(VoiceActivityEvent),
}

/// Clonable handle for driving a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineInput>,
}

/// Receiving side of the engine inbox, consumed by
/// [`ConversationEngine::new`].
#[derive(Debug)]
pub struct EngineInbox {
    rx: mpsc::UnboundedReceiver<EngineInput>,
    weak_tx: mpsc::WeakUnboundedSender<EngineInput>,
}

impl EngineHandle {
    /// Create the engine inbox. Hand the handle to adapters (recognizers, the
    /// UI) before the engine is built.
    pub fn channel() -> (Self, EngineInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let weak_tx = tx.downgrade();
        (Self { tx }, EngineInbox { rx, weak_tx })
    }

    pub fn wake(&self) -> Result<(), EngineError> {
        self.command(EngineCommand::Wake)
    }

    pub fn start_recording(&self) -> Result<(), EngineError> {
        self.command(EngineCommand::StartRecording)
    }

    pub fn submit_text(&self, text: impl Into<String>) -> Result<(), EngineError> {
        self.command(EngineCommand::SubmitText(text.into()))
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        self.command(EngineCommand::Stop)
    }

    pub fn acknowledge(&self) -> Result<(), EngineError> {
        self.command(EngineCommand::Acknowledge)
    }

    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.command(EngineCommand::Shutdown)
    }

    /// Deliver recognizer output. Recognizer adapters call this from
    /// whatever task produces results.
    pub fn recognizer_event(&self, event: RecognizerEvent) -> Result<(), EngineError> {
        self.send(EngineInput::Recognizer(event))
    }

    fn command(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.send(EngineInput::Command(command))
    }

    fn send(&self, input: EngineInput) -> Result<(), EngineError> {
        self.tx.send(input).map_err(|_| EngineError::NotRunning)
    }
}

/// External collaborators the engine drives.
pub struct EnginePorts {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub llm: Arc<dyn LlmClient>,
    /// Synthesis backends in fallback order.
    pub synthesizers: Vec<Arc<dyn SpeechSynthesizer>>,
    pub animation: Arc<dyn AnimationPlayer>,
    pub classifier: Arc<dyn EmotionClassifier>,
    /// Microphone for barge-in. `None` disables voice barge-in.
    pub microphone: Option<Arc<dyn MicrophoneSource>>,
    pub emitter: Arc<dyn EngineEventEmitter>,
}

/// The assistant reply currently being generated and spoken.
struct ActiveReply {
    turn_id: TurnId,
    /// Index of the assistant turn in the history.
    history_index: usize,
    buffer: StreamBuffer,
    /// `None` once speech has degraded to text-only.
    session_id: Option<SessionId>,
    cancel: CancellationToken,
    saw_token: bool,
    speaking: bool,
    stream_done: bool,
}

/// Conversation turn-taking and speech synchronization.
pub struct ConversationEngine {
    settings: EngineSettings,
    recognizer: Arc<dyn SpeechRecognizer>,
    llm: Arc<dyn LlmClient>,
    microphone: Option<Arc<dyn MicrophoneSource>>,
    emitter: Arc<dyn EngineEventEmitter>,

    machine: TurnStateMachine,
    accumulator: ChunkAccumulator,
    coordinator: SpeechSynthesisCoordinator,
    animation: AnimationSynchronizer,
    vad: VoiceActivityMonitor,

    inbox: mpsc::UnboundedReceiver<EngineInput>,
    self_tx: mpsc::WeakUnboundedSender<EngineInput>,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    vad_rx: broadcast::Receiver<VoiceActivityEvent>,

    history: Vec<ConversationTurn>,
    reply: Option<ActiveReply>,
}

impl std::fmt::Debug for ConversationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationEngine")
            .field("state", &self.machine.state())
            .field("turns", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl ConversationEngine {
    pub fn new(
        ports: EnginePorts,
        settings: EngineSettings,
        inbox: EngineInbox,
    ) -> Result<Self, EngineError> {
        validate_settings(&settings)?;

        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let vad = VoiceActivityMonitor::new(settings.vad.clone());
        let vad_rx = vad.subscribe();

        Ok(Self {
            machine: TurnStateMachine::new(&settings.recognition),
            accumulator: ChunkAccumulator::new(
                settings.chunking.clone(),
                TextNormalizer::new(ports.classifier),
            ),
            coordinator: SpeechSynthesisCoordinator::new(ports.synthesizers, session_tx),
            animation: AnimationSynchronizer::new(ports.animation, settings.animation.clone()),
            vad,
            recognizer: ports.recognizer,
            llm: ports.llm,
            microphone: ports.microphone,
            emitter: ports.emitter,
            inbox: inbox.rx,
            self_tx: inbox.weak_tx,
            session_rx,
            vad_rx,
            history: Vec::new(),
            reply: None,
            settings,
        })
    }

    pub const fn state(&self) -> TurnState {
        self.machine.state()
    }

    /// Conversation so far, oldest first.
    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// Run until shutdown or until every handle is dropped.
    pub async fn run(&mut self) {
        tracing::info!(
            state = %self.machine.state(),
            wake_word = self.settings.recognition.wake_word_mode,
            "Conversation engine started"
        );
        self.emitter
            .emit(EngineEvent::state_changed(self.machine.state()));
        let mut queue = VecDeque::new();
        for action in self.machine.initial_actions() {
            self.execute(action, &mut queue);
        }
        self.drain(queue);

        loop {
            let input = tokio::select! {
                biased;
                vad = self.vad_rx.recv() => match vad {
                    Ok(event) => EngineInput::Vad(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "VAD events lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => continue,
                },
                Some(event) = self.session_rx.recv() => EngineInput::Session(event),
                input = self.inbox.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
            };

            if !self.handle(input) {
                break;
            }
        }

        self.close();
        tracing::info!("Conversation engine stopped");
    }

    /// Process one input. Returns `false` on shutdown.
    fn handle(&mut self, input: EngineInput) -> bool {
        match input {
            EngineInput::Command(command) => return self.handle_command(command),
            EngineInput::Recognizer(event) => self.handle_recognizer(event),
            EngineInput::Token { turn_id, text } => self.handle_token(turn_id, &text),
            EngineInput::StreamFinished { turn_id, result } => {
                self.handle_stream_finished(turn_id, result);
            }
            EngineInput::Session(event) => self.handle_session(event),
            EngineInput::Vad(event) => match event.kind {
                VadEventKind::Start => {
                    tracing::debug!(
                        at_ms = event.timestamp.as_millis(),
                        energy = event.energy_level,
                        "Barge-in detected"
                    );
                    self.dispatch(TurnEvent::VadStart);
                    self.settle_interrupt();
                }
                VadEventKind::Stop => self.dispatch(TurnEvent::VadStop),
            },
        }
        true
    }

    fn handle_command(&mut self, command: EngineCommand) -> bool {
        let needs_input = matches!(
            command,
            EngineCommand::Wake | EngineCommand::StartRecording | EngineCommand::SubmitText(_)
        );
        if needs_input && self.machine.is_halted() {
            let err = EngineError::Halted;
            self.emit_error(err.kind(), err.to_string(), true);
            return true;
        }

        match command {
            EngineCommand::Wake => self.dispatch(TurnEvent::WakeWordDetected),
            EngineCommand::StartRecording => {
                self.dispatch(TurnEvent::InputStarted(InputSource::Recording));
                self.settle_interrupt();
            }
            EngineCommand::SubmitText(text) => {
                self.dispatch(TurnEvent::InputStarted(InputSource::Typing));
                self.dispatch(TurnEvent::FinalTranscript(text));
            }
            EngineCommand::Stop => self.dispatch(TurnEvent::Stop),
            EngineCommand::Acknowledge => {
                self.vad.reset_capability();
                self.dispatch(TurnEvent::Acknowledge);
            }
            EngineCommand::Shutdown => {
                self.dispatch(TurnEvent::Stop);
                return false;
            }
        }
        true
    }

    fn handle_recognizer(&mut self, event: RecognizerEvent) {
        match event {
            RecognizerEvent::Partial(text) => {
                self.emitter.emit(EngineEvent::Transcript {
                    text,
                    is_final: false,
                });
            }
            RecognizerEvent::Final(text) => {
                self.emitter.emit(EngineEvent::Transcript {
                    text: text.clone(),
                    is_final: true,
                });
                self.dispatch(TurnEvent::FinalTranscript(text));
            }
            RecognizerEvent::WakeWord => self.dispatch(TurnEvent::WakeWordDetected),
            RecognizerEvent::Ended => self.dispatch(TurnEvent::RecognitionEnded),
            RecognizerEvent::Error { message, fatal } => {
                tracing::warn!(%message, fatal, "Recognizer error");
                self.dispatch(TurnEvent::RecognizerFailed { message, fatal });
            }
        }
    }

    fn handle_token(&mut self, turn_id: TurnId, text: &str) {
        let Some(reply) = self.reply.as_mut().filter(|r| r.turn_id == turn_id) else {
            tracing::debug!(
                turn_id = %turn_id,
                kind = %ErrorKind::CancellationRace,
                "Dropping token for inactive turn"
            );
            return;
        };

        let first = !reply.saw_token;
        reply.saw_token = true;

        if let Some(turn) = self.history.get_mut(reply.history_index) {
            turn.append_text(text);
        }
        let chunk = self
            .accumulator
            .on_token_delta(turn_id, &mut reply.buffer, text);
        let session_id = reply.session_id;

        self.emitter.emit(EngineEvent::AssistantTextDelta {
            turn_id,
            text: text.to_string(),
        });
        if first {
            self.dispatch(TurnEvent::TokenReceived);
        }
        if let (Some(chunk), Some(session_id)) = (chunk, session_id) {
            self.coordinator.submit_chunk(session_id, chunk);
        }
    }

    fn handle_stream_finished(&mut self, turn_id: TurnId, result: Result<String, PortError>) {
        if !self.reply.as_ref().is_some_and(|r| r.turn_id == turn_id) {
            tracing::debug!(turn_id = %turn_id, "Ignoring end of stale stream");
            return;
        }

        match result {
            Ok(full_text) => {
                let saw_token = self.reply.as_ref().is_some_and(|r| r.saw_token);
                // Clients that do not stream deliver everything at the end.
                if !saw_token && !full_text.trim().is_empty() {
                    self.handle_token(turn_id, &full_text);
                }
                if self.reply.as_ref().is_some_and(|r| r.saw_token) {
                    self.finish_stream();
                } else {
                    tracing::info!(turn_id = %turn_id, "Model returned an empty reply");
                    self.discard_reply();
                    self.dispatch(TurnEvent::ResponseEmpty);
                }
            }
            Err(PortError::Cancelled) => {
                tracing::debug!(turn_id = %turn_id, "Stream ended by cancellation");
            }
            Err(e) => {
                let saw_token = self.reply.as_ref().is_some_and(|r| r.saw_token);
                tracing::warn!(turn_id = %turn_id, error = %e, saw_token, "Model stream failed");
                if saw_token {
                    // Keep what was generated; speak it out and report.
                    self.emit_error(e.kind(), e.to_string(), false);
                    self.finish_stream();
                } else {
                    self.discard_reply();
                    self.dispatch(TurnEvent::ModelFailed(e.to_string()));
                }
            }
        }
    }

    /// The stream is complete: flush the remainder and let the session
    /// drain.
    fn finish_stream(&mut self) {
        let Some(reply) = self.reply.as_mut() else {
            return;
        };
        reply.stream_done = true;

        let chunk = self.accumulator.flush(&mut reply.buffer);
        match reply.session_id {
            Some(session_id) => {
                if let Some(chunk) = chunk {
                    self.coordinator.submit_chunk(session_id, chunk);
                }
                self.coordinator.end_session(session_id);
            }
            // Text-only: nothing left to wait for.
            None => self.reply = None,
        }
    }

    fn handle_session(&mut self, event: SessionEvent) {
        if !self.coordinator.on_session_event(&event) {
            return;
        }
        self.animation.on_session_event(&event);

        match event {
            SessionEvent::ChunkStarted { .. } => {
                if let Some(reply) = self.reply.as_mut() {
                    if !reply.speaking {
                        reply.speaking = true;
                        self.emitter.emit(EngineEvent::SpeakingStarted);
                    }
                }
            }
            SessionEvent::ChunkFinished { .. } => {}
            SessionEvent::BackendFallback { from, to, reason, .. } => {
                self.emit_error(
                    ErrorKind::BackendUnavailable,
                    format!("Speech backend {from} failed ({reason}); switched to {to}"),
                    false,
                );
            }
            SessionEvent::SessionEnded { outcome, .. } => {
                let stream_done = self.reply.as_mut().is_some_and(|reply| {
                    reply.session_id = None;
                    if reply.speaking {
                        reply.speaking = false;
                        self.emitter.emit(EngineEvent::SpeakingFinished);
                    }
                    reply.stream_done
                });
                if stream_done {
                    self.reply = None;
                }

                match outcome {
                    SessionOutcome::Completed => self.dispatch(TurnEvent::SynthesisCompleted),
                    SessionOutcome::Failed { message } => {
                        self.dispatch(TurnEvent::SynthesisFailed(message));
                    }
                }
            }
        }
    }

    /// After a voice or recording barge-in, tear-down is synchronous, so the
    /// interrupt is handled right away.
    fn settle_interrupt(&mut self) {
        if self.machine.state() == TurnState::Interrupted {
            self.dispatch(TurnEvent::InterruptHandled);
        }
    }

    // ── State machine plumbing ─────────────────────────────────────

    fn dispatch(&mut self, event: TurnEvent) {
        self.drain(VecDeque::from([event]));
    }

    /// Apply events in order; actions may enqueue follow-up events.
    fn drain(&mut self, mut queue: VecDeque<TurnEvent>) {
        while let Some(event) = queue.pop_front() {
            let transition = self.machine.apply(event);
            if transition.from != transition.to {
                self.emitter
                    .emit(EngineEvent::state_changed(transition.to));
            }
            for action in transition.actions {
                self.execute(action, &mut queue);
            }
        }
    }

    fn execute(&mut self, action: TurnAction, follow_up: &mut VecDeque<TurnEvent>) {
        match action {
            TurnAction::StartRecognition(mode) => {
                let language = &self.settings.recognition.language;
                match self.recognizer.start(language, mode) {
                    Ok(()) => tracing::debug!(?mode, "Recognition started"),
                    Err(PortError::PermissionDenied(reason)) => {
                        let err = EngineError::CapabilityDenied(reason);
                        self.emit_error(err.kind(), err.to_string(), false);
                        follow_up.push_back(TurnEvent::Stop);
                    }
                    Err(e) => follow_up.push_back(TurnEvent::RecognizerFailed {
                        message: e.to_string(),
                        fatal: false,
                    }),
                }
            }
            TurnAction::StopRecognition => self.recognizer.stop(),
            TurnAction::BeginAssistantTurn { prompt } => self.begin_reply(prompt),
            TurnAction::CancelResponse => self.cancel_reply(),
            TurnAction::ArmBargeIn => self.arm_barge_in(),
            TurnAction::DisarmBargeIn => self.vad.stop(),
            TurnAction::ReportError {
                kind,
                message,
                fatal,
            } => self.emit_error(kind, message, fatal),
        }
    }

    fn emit_error(&self, kind: ErrorKind, message: impl Into<String>, fatal: bool) {
        let message = message.into();
        if kind == ErrorKind::CancellationRace {
            tracing::debug!(%message, "Cancellation race");
            return;
        }
        self.emitter.emit(EngineEvent::error(kind, message, fatal));
    }

    // ── Replies ────────────────────────────────────────────────────

    fn begin_reply(&mut self, prompt: String) {
        self.cancel_reply();

        let request = LlmRequest {
            prompt: prompt.clone(),
            history: self.history.clone(),
        };

        self.history.push(ConversationTurn::user(prompt));
        let assistant = ConversationTurn::assistant();
        let turn_id = assistant.id();
        self.history.push(assistant);

        let cancel = CancellationToken::new();
        let session_id = self.coordinator.begin_session(turn_id);
        self.spawn_stream(turn_id, request, cancel.clone());

        tracing::info!(turn_id = %turn_id, session_id = %session_id, "Assistant turn started");
        self.reply = Some(ActiveReply {
            turn_id,
            history_index: self.history.len() - 1,
            buffer: StreamBuffer::new(turn_id),
            session_id: Some(session_id),
            cancel,
            saw_token: false,
            speaking: false,
            stream_done: false,
        });
    }

    fn spawn_stream(&self, turn_id: TurnId, request: LlmRequest, cancel: CancellationToken) {
        let Some(tx) = self.self_tx.upgrade() else {
            tracing::warn!("Engine inbox closed, not starting generation");
            return;
        };
        let llm = Arc::clone(&self.llm);

        tokio::spawn(async move {
            let (sink, mut tokens) = TokenSink::new();
            let stream = llm.stream(request, sink, cancel.clone());
            tokio::pin!(stream);

            let result = loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    Some(text) = tokens.recv() => {
                        if tx.send(EngineInput::Token { turn_id, text }).is_err() {
                            return;
                        }
                    }
                    result = &mut stream => break result,
                }
            };

            // Tokens the client sent right before returning.
            while let Ok(text) = tokens.try_recv() {
                let _ = tx.send(EngineInput::Token { turn_id, text });
            }
            if !cancel.is_cancelled() {
                let _ = tx.send(EngineInput::StreamFinished { turn_id, result });
            }
        });
    }

    /// Cancel generation and speech for the current reply. The assistant
    /// turn keeps the text generated so far and is marked interrupted.
    fn cancel_reply(&mut self) {
        let Some(reply) = self.reply.take() else {
            return;
        };
        reply.cancel.cancel();

        if let Some(session_id) = reply.session_id {
            if self.coordinator.cancel(session_id) {
                self.animation.on_cancel(session_id);
            }
        }
        if reply.speaking {
            self.emitter.emit(EngineEvent::SpeakingFinished);
        }
        if let Some(turn) = self.history.get_mut(reply.history_index) {
            turn.mark_interrupted();
        }
        tracing::info!(turn_id = %reply.turn_id, "Assistant turn interrupted");
    }

    /// Drop a reply that produced nothing. The user turn stays in the
    /// history; the empty assistant turn does not.
    fn discard_reply(&mut self) {
        let Some(reply) = self.reply.take() else {
            return;
        };
        reply.cancel.cancel();
        if let Some(session_id) = reply.session_id {
            self.coordinator.cancel(session_id);
        }
        let is_last_and_empty = reply.history_index + 1 == self.history.len()
            && self
                .history
                .get(reply.history_index)
                .is_some_and(|turn| turn.text().is_empty());
        if is_last_and_empty {
            self.history.pop();
        }
    }

    fn arm_barge_in(&mut self) {
        let Some(mic) = self.microphone.clone() else {
            tracing::debug!("No microphone, voice barge-in unavailable");
            return;
        };

        // Edges left over from an earlier arming must not interrupt this
        // reply.
        loop {
            match self.vad_rx.try_recv() {
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => break,
            }
        }

        match self.vad.start(mic.as_ref()) {
            Ok(()) => {}
            Err(err @ EngineError::CapabilityDenied(_)) => {
                self.emit_error(err.kind(), err.to_string(), false);
            }
            Err(e) => tracing::warn!(error = %e, "Could not arm barge-in"),
        }
    }

    fn close(&mut self) {
        self.cancel_reply();
        self.vad.stop();
        self.recognizer.stop();
    }
}
