//! Conversational turn-taking and speech synchronization.
//!
//! This crate turns a streamed language-model reply into chunked,
//! deduplicated, emotion-tagged speech, keeps avatar animation in step with
//! the audio, and lets the user barge in while the assistant is talking.
//!
//! Components, leaf first:
//!
//! - [`text_utils`]: speech-oriented text cleanup ([`TextNormalizer`])
//! - [`chunker`]: sentence/fallback chunking with per-turn dedup
//! - [`vad`]: energy-based barge-in detection
//! - [`turn`]: the authoritative [`TurnStateMachine`]
//! - [`synthesis`]: one cancelable synthesis session at a time
//! - [`animation`]: talk animations sized to the spoken audio
//! - [`engine`]: the event loop tying them together
//!
//! Collaborators (recognizer, LLM, synthesizers, animation player, emotion
//! classifier, microphone) are the port traits from `duet-core`.

#![deny(unused_crate_dependencies)]

pub mod animation;
pub mod chunker;
pub mod engine;
pub mod synthesis;
pub mod text_utils;
pub mod turn;
pub mod vad;

// Re-export key types for convenience
pub use animation::AnimationSynchronizer;
pub use chunker::{ChunkAccumulator, StreamBuffer};
pub use engine::{
    ConversationEngine, EngineCommand, EngineHandle, EngineInbox, EngineInput, EnginePorts,
};
pub use synthesis::SpeechSynthesisCoordinator;
pub use text_utils::{NormalizedText, TextNormalizer};
pub use turn::{InputSource, Transition, TurnAction, TurnEvent, TurnStateMachine};
pub use vad::{EnergyDetector, VoiceActivityMonitor};
