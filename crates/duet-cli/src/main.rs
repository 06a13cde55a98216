//! `duet` entry point - the composition root.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use duet_cli::adapters::{ConsoleAnimation, EchoLlm, TypedRecognizer, synthesizers};
use duet_cli::{Cli, Overrides, load_settings, repl};
use duet_core::{ChannelEmitter, NeutralClassifier};
use duet_voice::{ConversationEngine, EngineHandle, EnginePorts};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load environment variables first so RUST_LOG and DUET_CONFIG apply
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout is the conversation
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("duet=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let overrides = Overrides {
        wake_word: cli.wake_word,
        language: cli.language.clone(),
    };
    let settings =
        load_settings(cli.config.as_deref(), &overrides).context("Failed to load settings")?;

    let (emitter, events) = ChannelEmitter::new();
    let ports = EnginePorts {
        recognizer: Arc::new(TypedRecognizer),
        llm: Arc::new(EchoLlm::new(Duration::from_millis(cli.token_delay_ms))),
        synthesizers: synthesizers(cli.mute),
        animation: Arc::new(ConsoleAnimation),
        classifier: Arc::new(NeutralClassifier),
        microphone: None,
        emitter: Arc::new(emitter),
    };
    tracing::info!(
        "No microphone configured, voice barge-in disabled (use /stop or type to interrupt)"
    );

    let (handle, inbox) = EngineHandle::channel();
    let mut engine = ConversationEngine::new(ports, settings, inbox)?;
    let engine_task = tokio::spawn(async move { engine.run().await });

    let result = repl::run(&handle, events).await;

    // The engine may already be gone if the REPL ended because it stopped.
    let _ = handle.shutdown();
    engine_task.await.context("Conversation engine task failed")?;
    result
}
