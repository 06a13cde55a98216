//! Domain types for the conversation engine.
//!
//! These are plain value types with no I/O. Ownership rules (who may mutate
//! what) are enforced by the engine; the types themselves only guard the
//! invariants that can be checked locally.

mod chunk;
mod emotion;
mod session;
mod state;
mod turn;
mod vad;

pub use chunk::{ChunkKind, SpeechChunk};
pub use emotion::{Emotion, EmotionScore};
pub use session::{SessionId, SessionState, SynthesisSession};
pub use state::TurnState;
pub use turn::{ConversationTurn, TurnId, TurnRole};
pub use vad::{VadEventKind, VoiceActivityEvent};
