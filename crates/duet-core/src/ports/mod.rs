//! Port definitions for the collaborators the engine drives.
//!
//! Everything behind these traits (speech recognition, the language model,
//! speech synthesis, avatar animation, emotion classification, microphone
//! access) is implemented outside the engine. The engine holds trait objects
//! so backends can be swapped without touching orchestration logic.

mod animation;
mod emotion;
mod event_emitter;
mod llm;
mod microphone;
mod recognizer;
mod synthesis;

pub use animation::AnimationPlayer;
pub use emotion::{EmotionClassifier, NeutralClassifier};
pub use event_emitter::{ChannelEmitter, EngineEventEmitter, NoopEmitter};
pub use llm::{LlmClient, LlmRequest, TokenSink};
pub use microphone::{AudioFrame, MicrophoneSource};
pub use recognizer::{ListenMode, RecognizerEvent, SpeechRecognizer};
pub use synthesis::{AudioHandle, SpeechStyle, SpeechSynthesizer};
