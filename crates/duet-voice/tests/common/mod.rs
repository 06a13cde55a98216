//! Mock collaborators shared by the engine integration tests.
//!
//! Everything runs on tokio's paused clock: synthesizers "play" audio by
//! sleeping, the scripted LLM sleeps between tokens, and the tests observe
//! the engine only through its public event stream and handle.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use duet_core::{
    AnimationPlayer, AudioFrame, AudioHandle, ChannelEmitter, EngineEvent, EngineSettings,
    ListenMode, LlmClient, LlmRequest, MicrophoneSource, NeutralClassifier, PortError,
    SpeechRecognizer, SpeechStyle, SpeechSynthesizer, TokenSink, TurnState,
};
use duet_voice::{ConversationEngine, EngineHandle, EnginePorts};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound on any single wait, in virtual time.
const WAIT: Duration = Duration::from_secs(60);

// ── Recognizer ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockRecognizer {
    calls: Mutex<Vec<String>>,
}

impl MockRecognizer {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl SpeechRecognizer for MockRecognizer {
    fn start(&self, language: &str, mode: ListenMode) -> Result<(), PortError> {
        let mode = match mode {
            ListenMode::WakeWord => "wake",
            ListenMode::Utterance => "utterance",
        };
        self.calls
            .lock()
            .unwrap()
            .push(format!("start:{language}:{mode}"));
        Ok(())
    }

    fn stop(&self) {
        self.calls.lock().unwrap().push("stop".to_string());
    }
}

// ── Language model ─────────────────────────────────────────────────

pub enum Reply {
    Text { text: String, token_delay: Duration },
    Fail(PortError),
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Self::Text {
            text: text.to_string(),
            token_delay: Duration::from_millis(5),
        }
    }
}

/// Streams canned replies word by word.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn stream(
        &self,
        request: LlmRequest,
        tokens: TokenSink,
        cancel: CancellationToken,
    ) -> Result<String, PortError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::text(""));

        let (text, token_delay) = match reply {
            Reply::Fail(e) => return Err(e),
            Reply::Text { text, token_delay } => (text, token_delay),
        };
        if text.is_empty() {
            return Ok(text);
        }

        for (i, word) in text.split(' ').enumerate() {
            tokio::select! {
                () = cancel.cancelled() => return Err(PortError::Cancelled),
                () = tokio::time::sleep(token_delay) => {}
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
        Ok(text)
    }
}

// ── Synthesis ──────────────────────────────────────────────────────

/// Synthesizer that plays each chunk for a fixed virtual time.
pub struct TimedTts {
    name: &'static str,
    play: Duration,
    fail: bool,
    next_id: AtomicU64,
    spoken: Mutex<Vec<String>>,
    stopped: AtomicUsize,
}

impl TimedTts {
    pub fn new(name: &'static str, play_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            name,
            play: Duration::from_millis(play_ms),
            fail: false,
            next_id: AtomicU64::new(1),
            spoken: Mutex::new(Vec::new()),
            stopped: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            play: Duration::ZERO,
            fail: true,
            next_id: AtomicU64::new(1),
            spoken: Mutex::new(Vec::new()),
            stopped: AtomicUsize::new(0),
        })
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for TimedTts {
    fn name(&self) -> &str {
        self.name
    }

    async fn speak(&self, text: &str, _style: SpeechStyle) -> Result<AudioHandle, PortError> {
        if self.fail {
            return Err(PortError::unavailable(self.name, "voice model not loaded"));
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(AudioHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            duration: Some(self.play),
        })
    }

    async fn wait_until_done(&self, _handle: AudioHandle) -> Result<(), PortError> {
        tokio::time::sleep(self.play).await;
        Ok(())
    }

    fn stop(&self, _handle: AudioHandle) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Animation ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingAnimation {
    commands: Mutex<Vec<String>>,
}

impl RecordingAnimation {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl AnimationPlayer for RecordingAnimation {
    fn trigger(&self, animation_id: &str, duration_ms: u64) -> Result<(), PortError> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("{animation_id}:{duration_ms}"));
        Ok(())
    }

    fn return_to_idle(&self, _duration_ms: u64) -> Result<(), PortError> {
        self.commands.lock().unwrap().push("idle".to_string());
        Ok(())
    }
}

// ── Microphone ─────────────────────────────────────────────────────

/// Microphone whose frames the test pushes by hand.
#[derive(Default)]
pub struct TestMic {
    deny: bool,
    tx: Mutex<Option<mpsc::Sender<AudioFrame>>>,
    opens: AtomicUsize,
}

impl TestMic {
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Push one loud 20 ms frame into the currently open stream.
    pub async fn speak_loudly(&self) {
        let tx = self.tx.lock().unwrap().clone().expect("microphone not open");
        tx.send(AudioFrame::new(vec![0.5; 320], Duration::from_millis(20)))
            .await
            .expect("monitor stopped reading");
    }
}

impl MicrophoneSource for TestMic {
    fn open(&self) -> Result<mpsc::Receiver<AudioFrame>, PortError> {
        if self.deny {
            return Err(PortError::PermissionDenied("microphone access refused".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        *self.tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }
}

// ── Harness ────────────────────────────────────────────────────────

pub struct Harness {
    pub handle: EngineHandle,
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
    pub recognizer: Arc<MockRecognizer>,
    pub llm: Arc<ScriptedLlm>,
    pub animation: Arc<RecordingAnimation>,
    pub engine: JoinHandle<ConversationEngine>,
}

pub struct HarnessBuilder {
    settings: EngineSettings,
    replies: Vec<Reply>,
    synthesizers: Vec<Arc<TimedTts>>,
    microphone: Option<Arc<TestMic>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        let mut settings = EngineSettings::default();
        settings.vad.debounce_ms = 0;
        Self {
            settings,
            replies: Vec::new(),
            synthesizers: Vec::new(),
            microphone: None,
        }
    }

    pub fn settings(mut self, f: impl FnOnce(&mut EngineSettings)) -> Self {
        f(&mut self.settings);
        self
    }

    pub fn reply(mut self, reply: Reply) -> Self {
        self.replies.push(reply);
        self
    }

    pub fn synthesizer(mut self, tts: Arc<TimedTts>) -> Self {
        self.synthesizers.push(tts);
        self
    }

    pub fn microphone(mut self, mic: Arc<TestMic>) -> Self {
        self.microphone = Some(mic);
        self
    }

    /// Build the engine and run it on a spawned task.
    pub fn spawn(self) -> Harness {
        let recognizer = Arc::new(MockRecognizer::default());
        let llm = Arc::new(ScriptedLlm::new(self.replies));
        let animation = Arc::new(RecordingAnimation::default());
        let (emitter, events) = ChannelEmitter::new();

        let ports = EnginePorts {
            recognizer: recognizer.clone(),
            llm: llm.clone(),
            synthesizers: self
                .synthesizers
                .into_iter()
                .map(|tts| tts as Arc<dyn SpeechSynthesizer>)
                .collect(),
            animation: animation.clone(),
            classifier: Arc::new(NeutralClassifier),
            microphone: self
                .microphone
                .map(|mic| mic as Arc<dyn MicrophoneSource>),
            emitter: Arc::new(emitter),
        };

        let (handle, inbox) = EngineHandle::channel();
        let mut engine =
            ConversationEngine::new(ports, self.settings, inbox).expect("valid settings");
        let engine = tokio::spawn(async move {
            engine.run().await;
            engine
        });

        Harness {
            handle,
            events,
            recognizer,
            llm,
            animation,
            engine,
        }
    }
}

impl Harness {
    /// Receive events until one matches `pred`; returns everything seen,
    /// including the match.
    pub async fn until(&mut self, pred: impl Fn(&EngineEvent) -> bool) -> Vec<EngineEvent> {
        let mut seen = Vec::new();
        let wait = async {
            while let Some(event) = self.events.recv().await {
                let done = pred(&event);
                seen.push(event);
                if done {
                    return;
                }
            }
            panic!("event stream closed");
        };
        if tokio::time::timeout(WAIT, wait).await.is_err() {
            panic!("timed out waiting for event; saw {seen:?}");
        }
        seen
    }

    pub async fn until_state(&mut self, state: TurnState) -> Vec<EngineEvent> {
        self.until(|e| *e == EngineEvent::state_changed(state)).await
    }

    /// Shut the engine down and hand it back for inspection.
    pub async fn finish(self) -> ConversationEngine {
        self.handle.shutdown().unwrap();
        self.engine.await.unwrap()
    }
}

pub fn states(events: &[EngineEvent]) -> Vec<TurnState> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::StateChanged { state } => Some(*state),
            _ => None,
        })
        .collect()
}

pub fn errors(events: &[EngineEvent]) -> Vec<(duet_core::ErrorKind, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Error { kind, fatal, .. } => Some((*kind, *fatal)),
            _ => None,
        })
        .collect()
}
