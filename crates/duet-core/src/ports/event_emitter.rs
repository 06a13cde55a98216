//! Event emitter trait for publishing engine events.
//!
//! Implementations handle transport details (channels, UI bridges, SSE, etc.).

use tokio::sync::mpsc;

use crate::events::EngineEvent;

/// Trait for emitting engine events to the application layer.
///
/// # Implementations
///
/// - [`NoopEmitter`] - for tests and headless contexts
/// - [`ChannelEmitter`] - forwards into a tokio channel
/// - Adapter-specific implementations (UI bridge, websocket, etc.)
pub trait EngineEventEmitter: Send + Sync {
    /// Emit an event. Must not block.
    fn emit(&self, event: EngineEvent);
}

/// A no-op event emitter that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    pub const fn new() -> Self {
        Self
    }
}

impl EngineEventEmitter for NoopEmitter {
    fn emit(&self, _event: EngineEvent) {
        // Intentionally do nothing
    }
}

/// Emitter backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelEmitter {
    /// Create an emitter and the receiver that observes its events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EngineEventEmitter for ChannelEmitter {
    fn emit(&self, event: EngineEvent) {
        // Best-effort: if the receiver is dropped, we log and move on.
        if self.tx.send(event).is_err() {
            tracing::warn!("Engine event receiver dropped");
        }
    }
}
