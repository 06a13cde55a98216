//! Streaming language-model client port.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::ConversationTurn;
use crate::error::PortError;

/// What the engine asks the model for.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// The user's latest message.
    pub prompt: String,
    /// Earlier turns, oldest first. Interrupted assistant turns carry only
    /// the text that was generated before the interruption.
    pub history: Vec<ConversationTurn>,
}

/// Where a streaming client delivers tokens.
#[derive(Debug, Clone)]
pub struct TokenSink {
    tx: mpsc::UnboundedSender<String>,
}

impl TokenSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver one token. Returns `false` once nobody is listening, which
    /// clients should treat like cancellation.
    pub fn send(&self, token: impl Into<String>) -> bool {
        self.tx.send(token.into()).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Streaming LLM client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Stream a reply token-by-token into `tokens`, resolving to the full
    /// text. Implementations must stop promptly once `cancel` fires and may
    /// return [`PortError::Cancelled`].
    async fn stream(
        &self,
        request: LlmRequest,
        tokens: TokenSink,
        cancel: CancellationToken,
    ) -> Result<String, PortError>;
}
