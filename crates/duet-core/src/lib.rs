//! Core domain types and port definitions for duet.
//!
//! This crate holds everything the conversation engine and its adapters
//! agree on: conversation turns, speech chunks, synthesis sessions, the turn
//! state enum, the error taxonomy, engine settings, and the collaborator
//! traits (recognizer, LLM, synthesizer, animation player, emotion
//! classifier, microphone). It contains no engine logic.

pub mod domain;
pub mod error;
pub mod events;
pub mod ports;
pub mod settings;

// Re-export commonly used types for convenience
pub use domain::{
    ChunkKind, ConversationTurn, Emotion, EmotionScore, SessionId, SessionState, SpeechChunk,
    SynthesisSession, TurnId, TurnRole, TurnState, VadEventKind, VoiceActivityEvent,
};
pub use error::{EngineError, ErrorKind, PortError};
pub use events::{EngineEvent, SessionEvent, SessionOutcome};
pub use ports::{
    AnimationPlayer, AudioFrame, AudioHandle, ChannelEmitter, EmotionClassifier,
    EngineEventEmitter, ListenMode, LlmClient, LlmRequest, MicrophoneSource, NeutralClassifier,
    NoopEmitter, RecognizerEvent, SpeechRecognizer, SpeechStyle, SpeechSynthesizer, TokenSink,
};
pub use settings::{
    AnimationSettings, ChunkingSettings, EngineSettings, RecognitionSettings, SettingsError,
    VadSettings, validate_settings,
};
