//! Shared test utilities
//!
//! Scripted stand-ins for the microphone, the three remote services and the
//! speaker, plus a harness that wires them into a running controller.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use voxturn::voice::{
    AudioSegment, AudioSink, CaptureConstraints, DEFAULT_SAMPLE_RATE, DeviceHandle, InputDevice,
    Recording,
};
use voxturn::{
    ControllerHandle, ControllerSettings, DialogueEngine, DialogueReply, Error, PipelineController,
    PipelineSettings, Result, Services, Synthesizer, Transcriber, TurnPipeline,
};

/// Generate `duration` of a 220Hz tone at the default capture rate
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn speech(duration: Duration) -> Vec<f32> {
    let rate = DEFAULT_SAMPLE_RATE as f32;
    let num_samples = (rate * duration.as_secs_f32()) as usize;
    (0..num_samples)
        .map(|i| 0.4 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / rate).sin())
        .collect()
}

/// Closed-by-default gate; each `open(n)` lets `n` waiters through
#[derive(Clone)]
pub struct Gate(Arc<Semaphore>);

impl Gate {
    pub fn closed() -> Self {
        Self(Arc::new(Semaphore::new(0)))
    }

    pub fn open(&self, permits: usize) {
        self.0.add_permits(permits);
    }

    async fn pass(&self) {
        self.0.acquire().await.expect("gate closed").forget();
    }
}

/// Microphone that delivers whatever the test says into it
#[derive(Default)]
pub struct ScriptedMicrophone {
    live: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<f32>>>>>,
    unavailable: Option<String>,
    gate: Option<Gate>,
    pub acquired: AtomicUsize,
    pub released: Arc<AtomicUsize>,
    pub constraints: Mutex<Option<CaptureConstraints>>,
}

impl ScriptedMicrophone {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Microphone whose acquisition always fails
    pub fn unavailable(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            unavailable: Some(reason.to_string()),
            ..Self::default()
        })
    }

    /// Microphone whose acquisition waits for `gate`
    pub fn gated(gate: &Gate) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate.clone()),
            ..Self::default()
        })
    }

    /// Push samples into the open device; false if nothing is open
    pub fn speak(&self, samples: &[f32]) -> bool {
        let live = self.live.lock().unwrap();
        live.as_ref()
            .is_some_and(|tx| samples.chunks(1024).all(|chunk| tx.send(chunk.to_vec()).is_ok()))
    }

    pub fn is_open(&self) -> bool {
        self.live.lock().unwrap().is_some()
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InputDevice for ScriptedMicrophone {
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<DeviceHandle> {
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        if let Some(reason) = &self.unavailable {
            return Err(Error::DeviceUnavailable(reason.clone()));
        }

        self.acquired.fetch_add(1, Ordering::SeqCst);
        *self.constraints.lock().unwrap() = Some(*constraints);

        let (tx, rx) = mpsc::unbounded_channel();
        *self.live.lock().unwrap() = Some(tx);

        let live = Arc::clone(&self.live);
        let released = Arc::clone(&self.released);
        Ok(DeviceHandle::new(constraints.sample_rate, rx, move || {
            live.lock().unwrap().take();
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// Transcriber answering with fixed text
pub struct FakeTranscriber {
    result: std::result::Result<String, String>,
    gate: Option<Gate>,
    pub recordings: Mutex<Vec<Recording>>,
}

impl FakeTranscriber {
    pub fn says(text: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(text.to_string()),
            gate: None,
            recordings: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Err(message.to_string()),
            gate: None,
            recordings: Mutex::new(Vec::new()),
        })
    }

    /// Transcriber that blocks until `gate` opens
    pub fn gated(text: &str, gate: Gate) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(text.to_string()),
            gate: Some(gate),
            recordings: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.recordings.lock().unwrap().len()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, recording: &Recording) -> Result<String> {
        self.recordings.lock().unwrap().push(recording.clone());
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        self.result.clone().map_err(Error::TranscriptionFailed)
    }
}

/// Dialogue engine answering with fixed replies
pub struct FakeDialogue {
    result: std::result::Result<Vec<DialogueReply>, String>,
    pub messages: Mutex<Vec<(String, String)>>,
}

impl FakeDialogue {
    pub fn replies(texts: &[&str]) -> Arc<Self> {
        Self::with(texts.iter().map(|t| DialogueReply::text(*t)).collect())
    }

    pub fn with(replies: Vec<DialogueReply>) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(replies),
            messages: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Err(message.to_string()),
            messages: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl DialogueEngine for FakeDialogue {
    async fn exchange(&self, sender: &str, message: &str) -> Result<Vec<DialogueReply>> {
        self.messages
            .lock()
            .unwrap()
            .push((sender.to_string(), message.to_string()));
        self.result.clone().map_err(Error::DialogueFailed)
    }
}

/// Synthesizer returning the reply text as audio bytes
#[derive(Default)]
pub struct FakeSynthesizer {
    fail_on: Option<String>,
    pub requests: Mutex<Vec<(String, String)>>,
}

impl FakeSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Synthesizer failing for one reply text
    pub fn failing_on(text: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(text.to_string()),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn texts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>> {
        self.requests
            .lock()
            .unwrap()
            .push((text.to_string(), lang.to_string()));
        if self.fail_on.as_deref() == Some(text) {
            return Err(Error::SynthesisFailed("503 Service Unavailable".to_string()));
        }
        Ok(text.as_bytes().to_vec())
    }
}

/// Speaker that logs segments and optionally waits on a gate per segment
///
/// Segments whose bytes are `bad` fail to play.
#[derive(Default)]
pub struct TestSink {
    gate: Option<Gate>,
    pub started: Mutex<Vec<usize>>,
    pub finished: Mutex<Vec<usize>>,
    pub interrupted: Arc<AtomicUsize>,
}

impl TestSink {
    /// Sink that plays every segment instantly
    pub fn instant() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sink that holds each segment until `gate` lets it finish
    pub fn gated(gate: Gate) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    pub fn started(&self) -> Vec<usize> {
        self.started.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<usize> {
        self.finished.lock().unwrap().clone()
    }
}

struct InterruptGuard {
    counter: Arc<AtomicUsize>,
    done: bool,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if !self.done {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl AudioSink for TestSink {
    async fn play(&self, segment: &AudioSegment) -> Result<()> {
        self.started.lock().unwrap().push(segment.index);
        let mut guard = InterruptGuard {
            counter: Arc::clone(&self.interrupted),
            done: false,
        };

        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        guard.done = true;

        if segment.data == b"bad" {
            return Err(Error::PlaybackFailed("undecodable audio".to_string()));
        }
        self.finished.lock().unwrap().push(segment.index);
        Ok(())
    }
}

/// Collaborators for one controller under test
pub struct Setup {
    pub mic: Arc<ScriptedMicrophone>,
    pub transcriber: Arc<FakeTranscriber>,
    pub dialogue: Arc<FakeDialogue>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub sink: Arc<TestSink>,
    pub settings: ControllerSettings,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            mic: ScriptedMicrophone::new(),
            transcriber: FakeTranscriber::says("turn on the lights"),
            dialogue: FakeDialogue::replies(&["Turning on the lights"]),
            synthesizer: FakeSynthesizer::new(),
            sink: TestSink::instant(),
            settings: ControllerSettings::default(),
        }
    }
}

pub fn pipeline_settings() -> PipelineSettings {
    PipelineSettings {
        sender: "test_user".to_string(),
        language: "Hindi".to_string(),
    }
}

impl Setup {
    pub fn services(&self) -> Services {
        Services {
            transcriber: self.transcriber.clone(),
            dialogue: self.dialogue.clone(),
            synthesizer: self.synthesizer.clone(),
        }
    }

    pub fn pipeline(&self) -> TurnPipeline {
        TurnPipeline::new(self.services(), pipeline_settings())
    }

    /// Spawn a controller over these collaborators
    pub fn spawn(self) -> Harness {
        let (controller, task) = PipelineController::spawn(
            self.mic.clone(),
            self.sink.clone(),
            self.pipeline(),
            self.settings.clone(),
        );

        Harness {
            controller,
            task,
            mic: self.mic,
            transcriber: self.transcriber,
            dialogue: self.dialogue,
            synthesizer: self.synthesizer,
            sink: self.sink,
        }
    }
}

/// A running controller and the collaborators it was built from
pub struct Harness {
    pub controller: ControllerHandle,
    pub task: JoinHandle<()>,
    pub mic: Arc<ScriptedMicrophone>,
    pub transcriber: Arc<FakeTranscriber>,
    pub dialogue: Arc<FakeDialogue>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub sink: Arc<TestSink>,
}

/// Yield to other tasks until `condition` holds, giving up after a while
pub async fn settle(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    condition()
}
