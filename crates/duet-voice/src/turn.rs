//! Conversation turn-taking state machine.
//!
//! [`TurnStateMachine`] is the single owner of [`TurnState`]. It is pure:
//! [`apply`](TurnStateMachine::apply) maps an event to the next state plus a
//! list of [`TurnAction`]s, and the engine carries those actions out. Nothing
//! else starts or stops recognition, barge-in monitoring, generation or
//! playback.
//!
//! ```text
//!  idle ──wake / input──► listening ──final──► processing ──token──► speaking
//!   ▲                        │                      │                 │   │
//!   └──────── ended ─────────┘       model error ───┘   completed ────┘   │ vad start
//!                            ▲                                            ▼
//!                            └──────────── interrupt handled ───── interrupted
//! ```
//!
//! In wake-word mode the rest state is `wakeListening` instead of `idle`.

use duet_core::{ErrorKind, ListenMode, RecognitionSettings, TurnState};

/// How the user began giving input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    Typing,
    Recording,
}

/// Everything that can happen to a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    WakeWordDetected,
    InputStarted(InputSource),
    FinalTranscript(String),
    /// Recognition ended without a transcript.
    RecognitionEnded,
    RecognizerFailed { message: String, fatal: bool },
    /// The first token of the reply arrived.
    TokenReceived,
    /// The model finished without producing any text.
    ResponseEmpty,
    ModelFailed(String),
    VadStart,
    VadStop,
    SynthesisCompleted,
    /// Every synthesis backend failed for the current reply.
    SynthesisFailed(String),
    /// The canceled reply has been torn down.
    InterruptHandled,
    Stop,
    /// Clear a latched repeated-failure halt.
    Acknowledge,
}

/// Side effects requested by a transition, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction {
    StartRecognition(ListenMode),
    StopRecognition,
    /// Create the assistant turn and start streaming a reply.
    BeginAssistantTurn { prompt: String },
    /// Cancel generation and the active synthesis session.
    CancelResponse,
    ArmBargeIn,
    DisarmBargeIn,
    ReportError {
        kind: ErrorKind,
        message: String,
        fatal: bool,
    },
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: TurnState,
    pub to: TurnState,
    pub actions: Vec<TurnAction>,
}

impl Transition {
    const fn stay(state: TurnState) -> Self {
        Self {
            from: state,
            to: state,
            actions: Vec::new(),
        }
    }

    /// Whether the event changed nothing.
    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.actions.is_empty()
    }
}

/// Authoritative conversation state.
#[derive(Debug, Clone)]
pub struct TurnStateMachine {
    state: TurnState,
    wake_word_mode: bool,
    failure_threshold: u32,
    consecutive_failures: u32,
    halted: bool,
}

impl TurnStateMachine {
    pub fn new(settings: &RecognitionSettings) -> Self {
        let mut machine = Self {
            state: TurnState::Idle,
            wake_word_mode: settings.wake_word_mode,
            failure_threshold: settings.failure_threshold.max(1),
            consecutive_failures: 0,
            halted: false,
        };
        machine.state = machine.rest_state();
        machine
    }

    pub const fn state(&self) -> TurnState {
        self.state
    }

    /// Whether voice input is latched off after repeated failures.
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Where the conversation returns when nothing is happening.
    pub const fn rest_state(&self) -> TurnState {
        if self.wake_word_mode {
            TurnState::WakeListening
        } else {
            TurnState::Idle
        }
    }

    /// Actions that bring collaborators in line with the initial state.
    pub fn initial_actions(&self) -> Vec<TurnAction> {
        if self.state == TurnState::WakeListening {
            vec![TurnAction::StartRecognition(ListenMode::WakeWord)]
        } else {
            Vec::new()
        }
    }

    /// Apply one event. Total: every event is defined in every state, most
    /// combinations being no-ops.
    pub fn apply(&mut self, event: TurnEvent) -> Transition {
        let from = self.state;
        let transition = self.next(event);
        self.state = transition.to;

        if !transition.is_noop() {
            tracing::debug!(
                from = %from,
                to = %transition.to,
                actions = transition.actions.len(),
                "Turn transition"
            );
        }
        transition
    }

    fn next(&mut self, event: TurnEvent) -> Transition {
        use TurnState as S;

        let from = self.state;
        match event {
            TurnEvent::Stop => return self.stop(),
            TurnEvent::Acknowledge => return self.acknowledge(),
            _ if self.halted => return Transition::stay(from),
            _ => {}
        }

        match (from, event) {
            // ── Starting a turn ───────────────────────────────────
            (
                S::Idle,
                TurnEvent::WakeWordDetected | TurnEvent::InputStarted(InputSource::Recording),
            ) => self.go(
                S::Listening,
                vec![TurnAction::StartRecognition(ListenMode::Utterance)],
            ),
            (S::Idle, TurnEvent::InputStarted(InputSource::Typing)) => {
                self.go(S::Listening, Vec::new())
            }

            (
                S::WakeListening,
                TurnEvent::WakeWordDetected | TurnEvent::InputStarted(InputSource::Recording),
            ) => self.go(
                S::Listening,
                vec![
                    TurnAction::StopRecognition,
                    TurnAction::StartRecognition(ListenMode::Utterance),
                ],
            ),
            (S::WakeListening, TurnEvent::InputStarted(InputSource::Typing)) => {
                self.go(S::Listening, vec![TurnAction::StopRecognition])
            }
            (S::WakeListening, TurnEvent::RecognitionEnded) => self.go(
                S::WakeListening,
                vec![TurnAction::StartRecognition(ListenMode::WakeWord)],
            ),

            // ── Listening ─────────────────────────────────────────
            (S::Listening | S::Interrupted, TurnEvent::FinalTranscript(text)) => {
                self.final_transcript(&text)
            }
            (S::Listening, TurnEvent::RecognitionEnded) => self.rest(Vec::new()),
            (S::Listening | S::WakeListening, TurnEvent::RecognizerFailed { message, fatal }) => {
                self.recognizer_failed(message, fatal)
            }

            // ── Generating ────────────────────────────────────────
            (S::Processing, TurnEvent::TokenReceived) => {
                self.go(S::Speaking, vec![TurnAction::ArmBargeIn])
            }
            (S::Processing, TurnEvent::ResponseEmpty) => self.rest(Vec::new()),
            (S::Processing, TurnEvent::ModelFailed(message)) => {
                self.rest(vec![TurnAction::ReportError {
                    kind: ErrorKind::BackendUnavailable,
                    message,
                    fatal: false,
                }])
            }
            (S::Processing, TurnEvent::InputStarted(_)) => {
                self.go(S::Interrupted, vec![TurnAction::CancelResponse])
            }

            // ── Speaking ──────────────────────────────────────────
            (S::Speaking, TurnEvent::VadStart | TurnEvent::InputStarted(_)) => self.go(
                S::Interrupted,
                vec![TurnAction::DisarmBargeIn, TurnAction::CancelResponse],
            ),
            (S::Speaking, TurnEvent::SynthesisCompleted) => {
                self.rest(vec![TurnAction::DisarmBargeIn])
            }
            (S::Speaking, TurnEvent::SynthesisFailed(message)) => self.rest(vec![
                TurnAction::DisarmBargeIn,
                TurnAction::ReportError {
                    kind: ErrorKind::BackendUnavailable,
                    message: format!("Speech output unavailable, continuing as text: {message}"),
                    fatal: false,
                },
            ]),

            // ── Interrupted ───────────────────────────────────────
            (S::Interrupted, TurnEvent::InterruptHandled) => self.go(
                S::Listening,
                vec![TurnAction::StartRecognition(ListenMode::Utterance)],
            ),

            _ => Transition::stay(from),
        }
    }

    fn go(&self, to: TurnState, actions: Vec<TurnAction>) -> Transition {
        Transition {
            from: self.state,
            to,
            actions,
        }
    }

    /// Return to the rest state after running `actions`.
    fn rest(&self, mut actions: Vec<TurnAction>) -> Transition {
        let to = self.rest_state();
        if to == TurnState::WakeListening {
            actions.push(TurnAction::StartRecognition(ListenMode::WakeWord));
        }
        self.go(to, actions)
    }

    fn final_transcript(&mut self, text: &str) -> Transition {
        let prompt = text.trim();
        if !prompt.chars().any(char::is_alphanumeric) {
            return self.rest(vec![
                TurnAction::StopRecognition,
                TurnAction::ReportError {
                    kind: ErrorKind::RecoverableInput,
                    message: "Sorry, I didn't catch that. Please try again.".to_string(),
                    fatal: false,
                },
            ]);
        }

        self.consecutive_failures = 0;
        self.go(
            TurnState::Processing,
            vec![
                TurnAction::StopRecognition,
                TurnAction::BeginAssistantTurn {
                    prompt: prompt.to_string(),
                },
            ],
        )
    }

    fn recognizer_failed(&mut self, message: String, fatal: bool) -> Transition {
        self.consecutive_failures += 1;

        if fatal || self.consecutive_failures >= self.failure_threshold {
            self.halted = true;
            tracing::warn!(
                failures = self.consecutive_failures,
                fatal,
                "Speech recognition halted"
            );
            return self.go(
                TurnState::Idle,
                vec![
                    TurnAction::StopRecognition,
                    TurnAction::ReportError {
                        kind: ErrorKind::RepeatedFailure,
                        message: format!(
                            "Speech recognition failed {} time(s) in a row: {message}",
                            self.consecutive_failures
                        ),
                        fatal: true,
                    },
                ],
            );
        }

        let mode = if self.state == TurnState::WakeListening {
            ListenMode::WakeWord
        } else {
            ListenMode::Utterance
        };
        self.go(
            self.state,
            vec![
                TurnAction::StartRecognition(mode),
                TurnAction::ReportError {
                    kind: ErrorKind::BackendUnavailable,
                    message,
                    fatal: false,
                },
            ],
        )
    }

    fn stop(&self) -> Transition {
        let actions = match self.state {
            TurnState::Idle => Vec::new(),
            TurnState::WakeListening | TurnState::Listening => vec![TurnAction::StopRecognition],
            TurnState::Processing | TurnState::Interrupted => vec![TurnAction::CancelResponse],
            TurnState::Speaking => vec![TurnAction::DisarmBargeIn, TurnAction::CancelResponse],
        };
        self.go(TurnState::Idle, actions)
    }

    fn acknowledge(&mut self) -> Transition {
        if !self.halted {
            return Transition::stay(self.state);
        }

        self.halted = false;
        self.consecutive_failures = 0;
        tracing::info!("Speech recognition halt acknowledged");

        if self.state == TurnState::Idle {
            self.rest(Vec::new())
        } else {
            self.go(self.state, Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> TurnStateMachine {
        TurnStateMachine::new(&RecognitionSettings::default())
    }

    fn wake_machine() -> TurnStateMachine {
        TurnStateMachine::new(&RecognitionSettings {
            wake_word_mode: true,
            ..RecognitionSettings::default()
        })
    }

    fn speaking(m: &mut TurnStateMachine) {
        m.apply(TurnEvent::InputStarted(InputSource::Typing));
        m.apply(TurnEvent::FinalTranscript("tell me a story".into()));
        m.apply(TurnEvent::TokenReceived);
        assert_eq!(m.state(), TurnState::Speaking);
    }

    #[test]
    fn starts_idle_or_wake_listening() {
        assert_eq!(machine().state(), TurnState::Idle);
        assert!(machine().initial_actions().is_empty());

        let wake = wake_machine();
        assert_eq!(wake.state(), TurnState::WakeListening);
        assert_eq!(
            wake.initial_actions(),
            vec![TurnAction::StartRecognition(ListenMode::WakeWord)]
        );
    }

    #[test]
    fn recording_starts_utterance_recognition() {
        let mut m = machine();
        let t = m.apply(TurnEvent::InputStarted(InputSource::Recording));
        assert_eq!(t.to, TurnState::Listening);
        assert_eq!(
            t.actions,
            vec![TurnAction::StartRecognition(ListenMode::Utterance)]
        );
    }

    #[test]
    fn final_transcript_begins_assistant_turn() {
        let mut m = machine();
        m.apply(TurnEvent::WakeWordDetected);
        let t = m.apply(TurnEvent::FinalTranscript("  what time is it? ".into()));
        assert_eq!(t.to, TurnState::Processing);
        assert!(t.actions.contains(&TurnAction::BeginAssistantTurn {
            prompt: "what time is it?".into()
        }));
    }

    #[test]
    fn garbled_transcript_is_recoverable() {
        let mut m = machine();
        m.apply(TurnEvent::InputStarted(InputSource::Recording));
        let t = m.apply(TurnEvent::FinalTranscript(" ... ".into()));
        assert_eq!(t.to, TurnState::Idle);
        assert!(t.actions.iter().any(|a| matches!(
            a,
            TurnAction::ReportError {
                kind: ErrorKind::RecoverableInput,
                fatal: false,
                ..
            }
        )));
    }

    #[test]
    fn empty_recognition_returns_to_rest() {
        let mut m = machine();
        m.apply(TurnEvent::WakeWordDetected);
        assert_eq!(m.apply(TurnEvent::RecognitionEnded).to, TurnState::Idle);

        let mut m = wake_machine();
        m.apply(TurnEvent::WakeWordDetected);
        let t = m.apply(TurnEvent::RecognitionEnded);
        assert_eq!(t.to, TurnState::WakeListening);
        assert_eq!(
            t.actions,
            vec![TurnAction::StartRecognition(ListenMode::WakeWord)]
        );
    }

    #[test]
    fn wake_word_restarts_recognition_for_utterance() {
        let mut m = wake_machine();
        let t = m.apply(TurnEvent::WakeWordDetected);
        assert_eq!(t.to, TurnState::Listening);
        assert_eq!(
            t.actions,
            vec![
                TurnAction::StopRecognition,
                TurnAction::StartRecognition(ListenMode::Utterance)
            ]
        );
    }

    #[test]
    fn first_token_arms_barge_in() {
        let mut m = machine();
        m.apply(TurnEvent::InputStarted(InputSource::Typing));
        m.apply(TurnEvent::FinalTranscript("hi there".into()));
        let t = m.apply(TurnEvent::TokenReceived);
        assert_eq!(t.to, TurnState::Speaking);
        assert_eq!(t.actions, vec![TurnAction::ArmBargeIn]);

        // Later tokens change nothing.
        assert!(m.apply(TurnEvent::TokenReceived).is_noop());
    }

    #[test]
    fn model_error_reports_and_rests() {
        let mut m = machine();
        m.apply(TurnEvent::InputStarted(InputSource::Typing));
        m.apply(TurnEvent::FinalTranscript("hello".into()));
        let t = m.apply(TurnEvent::ModelFailed("connection refused".into()));
        assert_eq!(t.to, TurnState::Idle);
        assert_eq!(
            t.actions,
            vec![TurnAction::ReportError {
                kind: ErrorKind::BackendUnavailable,
                message: "connection refused".into(),
                fatal: false,
            }]
        );
    }

    #[test]
    fn vad_start_interrupts_speech() {
        let mut m = machine();
        speaking(&mut m);
        let t = m.apply(TurnEvent::VadStart);
        assert_eq!(t.to, TurnState::Interrupted);
        assert_eq!(
            t.actions,
            vec![TurnAction::DisarmBargeIn, TurnAction::CancelResponse]
        );

        let t = m.apply(TurnEvent::InterruptHandled);
        assert_eq!(t.to, TurnState::Listening);
        assert_eq!(
            t.actions,
            vec![TurnAction::StartRecognition(ListenMode::Utterance)]
        );
    }

    #[test]
    fn typing_while_speaking_interrupts() {
        let mut m = machine();
        speaking(&mut m);
        assert_eq!(
            m.apply(TurnEvent::InputStarted(InputSource::Typing)).to,
            TurnState::Interrupted
        );
        let t = m.apply(TurnEvent::FinalTranscript("actually, never mind".into()));
        assert_eq!(t.to, TurnState::Processing);
    }

    #[test]
    fn vad_outside_speaking_is_ignored() {
        let mut m = machine();
        assert!(m.apply(TurnEvent::VadStart).is_noop());
        m.apply(TurnEvent::WakeWordDetected);
        assert!(m.apply(TurnEvent::VadStart).is_noop());
        assert!(m.apply(TurnEvent::VadStop).is_noop());
    }

    #[test]
    fn synthesis_completion_rests() {
        let mut m = wake_machine();
        m.apply(TurnEvent::InputStarted(InputSource::Typing));
        m.apply(TurnEvent::FinalTranscript("hello".into()));
        m.apply(TurnEvent::TokenReceived);
        let t = m.apply(TurnEvent::SynthesisCompleted);
        assert_eq!(t.to, TurnState::WakeListening);
        assert_eq!(
            t.actions,
            vec![
                TurnAction::DisarmBargeIn,
                TurnAction::StartRecognition(ListenMode::WakeWord)
            ]
        );
    }

    #[test]
    fn synthesis_failure_degrades_to_text() {
        let mut m = machine();
        speaking(&mut m);
        let t = m.apply(TurnEvent::SynthesisFailed("all backends down".into()));
        assert_eq!(t.to, TurnState::Idle);
        assert!(!t.actions.contains(&TurnAction::CancelResponse));
    }

    #[test]
    fn stop_from_speaking_cancels_everything() {
        let mut m = machine();
        speaking(&mut m);
        let t = m.apply(TurnEvent::Stop);
        assert_eq!(t.to, TurnState::Idle);
        assert_eq!(
            t.actions,
            vec![TurnAction::DisarmBargeIn, TurnAction::CancelResponse]
        );
    }

    #[test]
    fn recognizer_failures_restart_until_threshold() {
        let mut m = machine();
        m.apply(TurnEvent::InputStarted(InputSource::Recording));

        for n in 1..4 {
            let t = m.apply(TurnEvent::RecognizerFailed {
                message: "timeout".into(),
                fatal: false,
            });
            assert_eq!(t.to, TurnState::Listening);
            assert_eq!(m.consecutive_failures(), n);
            assert_eq!(
                t.actions[0],
                TurnAction::StartRecognition(ListenMode::Utterance)
            );
        }

        let t = m.apply(TurnEvent::RecognizerFailed {
            message: "timeout".into(),
            fatal: false,
        });
        assert_eq!(t.to, TurnState::Idle);
        assert!(m.is_halted());
        assert!(t.actions.iter().any(|a| matches!(
            a,
            TurnAction::ReportError {
                kind: ErrorKind::RepeatedFailure,
                fatal: true,
                ..
            }
        )));
    }

    #[test]
    fn successful_transcript_resets_failure_count() {
        let mut m = machine();
        m.apply(TurnEvent::InputStarted(InputSource::Recording));
        m.apply(TurnEvent::RecognizerFailed {
            message: "glitch".into(),
            fatal: false,
        });
        m.apply(TurnEvent::FinalTranscript("ok now it works".into()));
        assert_eq!(m.consecutive_failures(), 0);
    }

    #[test]
    fn fatal_error_halts_until_acknowledged() {
        let mut m = wake_machine();
        m.apply(TurnEvent::RecognizerFailed {
            message: "model missing".into(),
            fatal: true,
        });
        assert!(m.is_halted());
        assert_eq!(m.state(), TurnState::Idle);

        assert!(m.apply(TurnEvent::WakeWordDetected).is_noop());
        assert!(m.apply(TurnEvent::InputStarted(InputSource::Typing)).is_noop());

        let t = m.apply(TurnEvent::Acknowledge);
        assert!(!m.is_halted());
        assert_eq!(t.to, TurnState::WakeListening);
        assert_eq!(
            t.actions,
            vec![TurnAction::StartRecognition(ListenMode::WakeWord)]
        );
    }

    #[test]
    fn acknowledge_without_halt_is_noop() {
        let mut m = machine();
        assert!(m.apply(TurnEvent::Acknowledge).is_noop());
    }
}
