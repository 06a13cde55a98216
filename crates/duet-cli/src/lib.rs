//! Console front end for the duet conversation engine.
//!
//! Wires console adapters into a [`duet_voice::ConversationEngine`] and runs
//! a line-oriented chat: what you type becomes a user turn, the reply streams
//! back as text while the console synthesizer "speaks" it chunk by chunk.

#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

// Used by the binary only.
use dotenvy as _;
use tracing_subscriber as _;

pub mod adapters;
pub mod config;
pub mod parser;
pub mod repl;

pub use config::{ConfigError, Overrides, load_settings};
pub use parser::Cli;
