//! The interactive loop: stdin lines in, engine events out.

use std::io::{BufRead, Write};

use anyhow::Result;
use duet_core::{EngineEvent, TurnState};
use duet_voice::EngineHandle;
use tokio::sync::mpsc;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Submit(String),
    Stop,
    Acknowledge,
    Wake,
    Quit,
    Help,
    Unknown(String),
    Empty,
}

pub fn parse_line(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ReplCommand::Submit(line.to_string());
    };
    match command.trim().to_lowercase().as_str() {
        "stop" => ReplCommand::Stop,
        "ack" => ReplCommand::Acknowledge,
        "wake" => ReplCommand::Wake,
        "quit" | "exit" => ReplCommand::Quit,
        "help" | "?" => ReplCommand::Help,
        other => ReplCommand::Unknown(other.to_string()),
    }
}

pub const HELP: &str = "Type a message and press enter. Commands: /stop /ack /wake /quit";

/// Writes engine events to a terminal.
///
/// Assistant text streams inline; everything else gets its own line.
#[derive(Debug)]
pub struct EventPrinter<W> {
    out: W,
    mid_line: bool,
}

impl<W: Write> EventPrinter<W> {
    pub const fn new(out: W) -> Self {
        Self {
            out,
            mid_line: false,
        }
    }

    pub fn print(&mut self, event: &EngineEvent) -> std::io::Result<()> {
        match event {
            EngineEvent::AssistantTextDelta { text, .. } => {
                if !self.mid_line {
                    write!(self.out, "duet> ")?;
                    self.mid_line = true;
                }
                write!(self.out, "{text}")?;
            }
            EngineEvent::StateChanged { state } => {
                // End the streamed reply once the turn is over.
                if matches!(
                    state,
                    TurnState::Idle | TurnState::WakeListening | TurnState::Interrupted
                ) {
                    self.end_line()?;
                }
                tracing::debug!(%state, "State changed");
            }
            EngineEvent::Transcript { text, is_final } => {
                if *is_final {
                    self.end_line()?;
                    writeln!(self.out, "you> {text}")?;
                }
            }
            EngineEvent::SpeakingStarted | EngineEvent::SpeakingFinished => {}
            EngineEvent::Error {
                kind,
                message,
                fatal,
            } => {
                self.end_line()?;
                let label = if *fatal { "error" } else { "warning" };
                writeln!(self.out, "[{label}: {kind}] {message}")?;
                if *fatal {
                    writeln!(self.out, "(type /ack to continue)")?;
                }
            }
        }
        self.out.flush()
    }

    fn end_line(&mut self) -> std::io::Result<()> {
        if self.mid_line {
            writeln!(self.out)?;
            self.mid_line = false;
        }
        Ok(())
    }
}

/// Read stdin on a plain thread so a pending read never holds up runtime
/// shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Run until `/quit`, end of input, or the engine going away.
pub async fn run(
    handle: &EngineHandle,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
) -> Result<()> {
    let mut lines = spawn_stdin_reader();
    let mut printer = EventPrinter::new(std::io::stdout());
    println!("{HELP}");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => printer.print(&event)?,
                None => break,
            },
            line = lines.recv() => {
                let Some(line) = line.transpose()? else {
                    break;
                };
                match parse_line(&line) {
                    ReplCommand::Submit(text) => handle.submit_text(text)?,
                    ReplCommand::Stop => handle.stop()?,
                    ReplCommand::Acknowledge => handle.acknowledge()?,
                    ReplCommand::Wake => handle.wake()?,
                    ReplCommand::Quit => break,
                    ReplCommand::Help => println!("{HELP}"),
                    ReplCommand::Unknown(command) => println!("Unknown command /{command}. {HELP}"),
                    ReplCommand::Empty => {}
                }
            }
        }
    }
    Ok(())
}
