//! Console stand-ins for the engine's collaborators.
//!
//! None of these talk to a real model or audio device. They make the engine's
//! behavior visible in a terminal: replies stream word by word, "speech" is
//! a printed line held for as long as it would take to say.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use duet_core::{
    AnimationPlayer, AudioHandle, ListenMode, LlmClient, LlmRequest, PortError, SpeechRecognizer,
    SpeechStyle, SpeechSynthesizer, TokenSink,
};
use tokio_util::sync::CancellationToken;

/// Speaking rate used to size console "audio".
const MS_PER_CHAR: u64 = 55;

/// Replies by echoing the prompt, streamed one word at a time.
#[derive(Debug, Clone)]
pub struct EchoLlm {
    token_delay: Duration,
}

impl EchoLlm {
    pub const fn new(token_delay: Duration) -> Self {
        Self { token_delay }
    }

    pub fn reply_for(request: &LlmRequest) -> String {
        let prompt = request.prompt.trim();
        let exchanges = request.history.len() / 2;
        let mut reply = format!("You said: {prompt}");
        if !prompt.ends_with(['.', '!', '?']) {
            reply.push('.');
        }
        match exchanges {
            0 => reply.push_str(" This is the first thing you have told me today."),
            1 => reply.push_str(" We have talked once before in this session."),
            n => reply.push_str(&format!(" We have talked {n} times before in this session.")),
        }
        reply
    }
}

#[async_trait]
impl LlmClient for EchoLlm {
    async fn stream(
        &self,
        request: LlmRequest,
        tokens: TokenSink,
        cancel: CancellationToken,
    ) -> Result<String, PortError> {
        let reply = Self::reply_for(&request);

        for (i, word) in reply.split_whitespace().enumerate() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PortError::Cancelled),
                () = tokio::time::sleep(self.token_delay) => {}
            }
            let token = if i == 0 {
                word.to_string()
            } else {
                format!(" {word}")
            };
            if !tokens.send(token) {
                return Err(PortError::Cancelled);
            }
        }
        Ok(reply)
    }
}

/// Prints each chunk and holds it for its estimated speaking time.
#[derive(Debug)]
pub struct ConsoleSynthesizer {
    next_id: AtomicU64,
    mute: bool,
}

impl ConsoleSynthesizer {
    pub const fn new(mute: bool) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            mute,
        }
    }

    pub fn estimated_duration(text: &str) -> Duration {
        let chars = u64::try_from(text.chars().count()).unwrap_or(u64::MAX);
        Duration::from_millis(chars.saturating_mul(MS_PER_CHAR))
    }
}

#[async_trait]
impl SpeechSynthesizer for ConsoleSynthesizer {
    fn name(&self) -> &str {
        "console"
    }

    async fn speak(&self, text: &str, style: SpeechStyle) -> Result<AudioHandle, PortError> {
        let handle = AudioHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            duration: Some(Self::estimated_duration(text)),
        };
        if !self.mute {
            println!("\n  🔊 [{}] {text}", style.emotion);
        }
        tracing::debug!(handle = handle.id, chars = text.len(), "Console speech started");
        Ok(handle)
    }

    async fn wait_until_done(&self, handle: AudioHandle) -> Result<(), PortError> {
        tokio::time::sleep(handle.duration.unwrap_or_default()).await;
        Ok(())
    }

    fn stop(&self, handle: AudioHandle) {
        tracing::debug!(handle = handle.id, "Console speech stopped");
    }
}

/// Logs animation commands.
#[derive(Debug, Default)]
pub struct ConsoleAnimation;

impl AnimationPlayer for ConsoleAnimation {
    fn trigger(&self, animation_id: &str, duration_ms: u64) -> Result<(), PortError> {
        tracing::info!(animation = %animation_id, duration_ms, "Avatar animation");
        Ok(())
    }

    fn return_to_idle(&self, duration_ms: u64) -> Result<(), PortError> {
        tracing::info!(duration_ms, "Avatar back to idle");
        Ok(())
    }
}

/// There is no speech input in the console; transcripts arrive as typed
/// text instead.
#[derive(Debug, Default)]
pub struct TypedRecognizer;

impl SpeechRecognizer for TypedRecognizer {
    fn start(&self, language: &str, mode: ListenMode) -> Result<(), PortError> {
        tracing::debug!(%language, ?mode, "Listening (type your message)");
        Ok(())
    }

    fn stop(&self) {
        tracing::debug!("Stopped listening");
    }
}

/// Backends in fallback order.
pub fn synthesizers(mute: bool) -> Vec<Arc<dyn SpeechSynthesizer>> {
    vec![Arc::new(ConsoleSynthesizer::new(mute))]
}
