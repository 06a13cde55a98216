//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Talk to the duet conversation engine from a terminal.
#[derive(Debug, Parser)]
#[command(name = "duet")]
#[command(about = "Interactive text chat driving the duet conversation engine")]
#[command(version)]
pub struct Cli {
    /// JSON settings file
    #[arg(long, env = "DUET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Rest in wake-word listening instead of idle
    #[arg(long = "wake-word")]
    pub wake_word: bool,

    /// Recognizer language tag
    #[arg(long)]
    pub language: Option<String>,

    /// Delay between streamed words of the echo model, in milliseconds
    #[arg(long = "token-delay-ms", default_value_t = 60)]
    pub token_delay_ms: u64,

    /// Print engine events without speaking chunks aloud
    #[arg(long = "mute")]
    pub mute: bool,
}
