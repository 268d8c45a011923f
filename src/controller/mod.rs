//! Pipeline controller: owns the capture session, the in-flight pipeline and
//! the playback queue, and is the only writer of [`TurnStatus`]
//!
//! The controller runs as a single task. Callers talk to it through a
//! cloneable [`ControllerHandle`]; every action, auto-stop timer, pipeline
//! event and playback report is handled in order on that task, so turns can
//! never interleave.

mod state;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::pipeline::{PipelineEvent, PipelineOutcome, TurnPipeline};
use crate::voice::{
    AudioSink, CaptureConstraints, CaptureSession, DeviceHandle, InputDevice, MAX_CAPTURE_DURATION,
    PlaybackQueue, QueueAdvance, SegmentFinished, TurnId,
};
use crate::{Error, Result, Stage, TurnError};

pub use state::{PlaybackFailure, TurnOutcome, TurnState, TurnStatus};

/// Capacity of the action channel
const COMMAND_BUFFER: usize = 32;

/// Controller tuning
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Options requested when opening the microphone
    pub constraints: CaptureConstraints,
    /// Capture duration ceiling before auto-stop
    pub max_capture: Duration,
    /// Initial value of the readiness gate
    pub start_ready: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            constraints: CaptureConstraints::default(),
            max_capture: MAX_CAPTURE_DURATION,
            start_ready: true,
        }
    }
}

enum Command {
    StartTurn(oneshot::Sender<Result<TurnId>>),
    EndTurn(oneshot::Sender<Result<()>>),
    ToggleCapture(oneshot::Sender<Result<TurnState>>),
    SetReady(bool, oneshot::Sender<TurnStatus>),
}

/// Caller waiting for the microphone to open
enum StartReply {
    Start(oneshot::Sender<Result<TurnId>>),
    Toggle(oneshot::Sender<Result<TurnState>>),
}

impl StartReply {
    fn send(self, result: Result<TurnId>) {
        match self {
            Self::Start(tx) => {
                let _ = tx.send(result);
            }
            Self::Toggle(tx) => {
                let _ = tx.send(result.map(|_| TurnState::Capturing));
            }
        }
    }
}

enum Internal {
    DeviceOpened { turn: TurnId, result: Result<DeviceHandle> },
    AutoStop(TurnId),
    Pipeline { turn: TurnId, event: PipelineEvent },
    PipelineDone { turn: TurnId, result: Result<PipelineOutcome> },
}

/// Bookkeeping for the turn currently owned by the controller
struct LiveTurn {
    id: TurnId,
    opening: Option<StartReply>,
    auto_stop: Option<JoinHandle<()>>,
    pipeline: Option<JoinHandle<()>>,
    pipeline_done: bool,
}

impl LiveTurn {
    const fn new(id: TurnId, reply: StartReply) -> Self {
        Self {
            id,
            opening: Some(reply),
            auto_stop: None,
            pipeline: None,
            pipeline_done: false,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.auto_stop.take() {
            timer.abort();
        }
    }

    /// Stop the pipeline task; results still in flight are ignored on arrival
    fn cancel(&mut self) {
        if let Some(reply) = self.opening.take() {
            reply.send(Err(Error::Cancelled));
        }
        self.cancel_timer();
        if let Some(task) = self.pipeline.take() {
            task.abort();
        }
    }
}

/// Cheap, cloneable access to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<TurnStatus>,
}

impl ControllerHandle {
    /// Start a new turn: acquire the microphone and begin capturing
    ///
    /// Clears a pending error first.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` while the readiness gate is closed, `InvalidState`
    /// unless idle (or in error), `DeviceUnavailable`, or `Cancelled` if the
    /// turn is ended while the microphone is still opening
    pub async fn start_turn(&self) -> Result<TurnId> {
        self.request(Command::StartTurn).await?
    }

    /// End the current turn
    ///
    /// While capturing, buffered audio is discarded. While processing or
    /// playing, playback stops and the pipeline's result is ignored. In
    /// error, the error is acknowledged. Idle is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ControllerClosed` if the controller has stopped
    pub async fn end_turn(&self) -> Result<()> {
        self.request(Command::EndTurn).await?
    }

    /// Start capturing when idle, stop capturing when capturing
    ///
    /// Returns the state after the action.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` while processing or playing, plus anything
    /// [`start_turn`](Self::start_turn) can return
    pub async fn toggle_capture(&self) -> Result<TurnState> {
        self.request(Command::ToggleCapture).await?
    }

    /// Open or close the readiness gate
    ///
    /// Returns the status right after the change.
    ///
    /// # Errors
    ///
    /// Returns `ControllerClosed` if the controller has stopped
    pub async fn set_ready(&self, ready: bool) -> Result<TurnStatus> {
        self.request(|reply| Command::SetReady(ready, reply)).await
    }

    /// Current status snapshot
    #[must_use]
    pub fn status(&self) -> TurnStatus {
        self.status.borrow().clone()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TurnState {
        self.status.borrow().state
    }

    /// Receiver notified on every status change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TurnStatus> {
        self.status.clone()
    }

    /// Wait until the status satisfies `predicate`
    ///
    /// # Errors
    ///
    /// Returns `ControllerClosed` if the controller stops first
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&TurnStatus) -> bool,
    ) -> Result<TurnStatus> {
        let mut rx = self.status.clone();
        rx.wait_for(|status| predicate(status))
            .await
            .map(|status| status.clone())
            .map_err(|_| Error::ControllerClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| Error::ControllerClosed)?;
        rx.await.map_err(|_| Error::ControllerClosed)
    }
}

/// Composition root for one voice turn at a time
pub struct PipelineController {
    capture: CaptureSession,
    pipeline: TurnPipeline,
    playback: PlaybackQueue,
    status: watch::Sender<TurnStatus>,
    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    playback_rx: mpsc::UnboundedReceiver<SegmentFinished>,
    last_turn: TurnId,
    live: Option<LiveTurn>,
}

impl PipelineController {
    /// Spawn the controller task
    ///
    /// The task runs until every [`ControllerHandle`] is dropped.
    #[must_use]
    pub fn spawn(
        input: Arc<dyn InputDevice>,
        sink: Arc<dyn AudioSink>,
        pipeline: TurnPipeline,
        settings: ControllerSettings,
    ) -> (ControllerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(TurnStatus::new(settings.start_ready));

        let controller = Self {
            capture: CaptureSession::new(input, settings.constraints, settings.max_capture),
            pipeline,
            playback: PlaybackQueue::new(sink, playback_tx),
            status: status_tx,
            commands: command_rx,
            internal_tx,
            internal_rx,
            playback_rx,
            last_turn: TurnId::default(),
            live: None,
        };

        let task = tokio::spawn(controller.run());
        let handle = ControllerHandle {
            commands: command_tx,
            status: status_rx,
        };

        (handle, task)
    }

    async fn run(mut self) {
        tracing::debug!("controller started");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command);
                }
                Some(event) = self.internal_rx.recv() => self.handle_internal(event),
                Some(report) = self.playback_rx.recv() => self.on_playback_finished(&report),
            }
        }

        if let Some(mut live) = self.live.take() {
            live.cancel();
        }
        self.playback.abort();
        self.capture.abort();
        tracing::debug!("controller stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartTurn(reply) => self.start_turn(StartReply::Start(reply)),
            Command::EndTurn(reply) => {
                self.end_turn();
                let _ = reply.send(Ok(()));
            }
            Command::ToggleCapture(reply) => match self.state() {
                TurnState::Idle | TurnState::Error => self.start_turn(StartReply::Toggle(reply)),
                TurnState::Capturing => {
                    let _ = reply.send(self.stop_capture());
                }
                state => {
                    let _ = reply.send(Err(Error::InvalidState {
                        action: "toggle capture",
                        state,
                    }));
                }
            },
            Command::SetReady(ready, reply) => {
                tracing::info!(ready, "readiness changed");
                self.update(|s| s.ready = ready);
                let _ = reply.send(self.status.borrow().clone());
            }
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::DeviceOpened { turn, result } => self.on_device_opened(turn, result),
            Internal::AutoStop(turn) => {
                if self.is_live(turn) && self.state() == TurnState::Capturing {
                    tracing::info!(turn = %turn, "capture ceiling reached, stopping");
                    if let Err(e) = self.stop_capture() {
                        tracing::warn!(turn = %turn, error = %e, "auto-stop failed");
                    }
                }
            }
            Internal::Pipeline { turn, event } => self.on_pipeline_event(turn, event),
            Internal::PipelineDone { turn, result } => self.on_pipeline_done(turn, result),
        }
    }

    fn state(&self) -> TurnState {
        self.status.borrow().state
    }

    fn is_live(&self, turn: TurnId) -> bool {
        self.live.as_ref().is_some_and(|live| live.id == turn)
    }

    fn update(&self, apply: impl FnOnce(&mut TurnStatus)) {
        self.status.send_modify(|status| {
            apply(status);
            status.updated_at = Utc::now();
        });
    }

    fn set_state(&self, next: TurnState) {
        let current = self.state();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            tracing::warn!(from = %current, to = %next, "unexpected state transition");
        }
        tracing::info!(from = %current, to = %next, "turn state changed");
        self.update(|s| s.state = next);
    }

    /// Begin a turn; the reply is sent once the microphone is armed
    fn start_turn(&mut self, reply: StartReply) {
        let (ready, state, allowed) = {
            let status = self.status.borrow();
            (status.ready, status.state, status.can_start())
        };
        if !allowed {
            let error = if ready {
                Error::InvalidState {
                    action: "start a turn",
                    state,
                }
            } else {
                Error::NotReady
            };
            reply.send(Err(error));
            return;
        }
        if state == TurnState::Error {
            self.clear_error();
        }

        let turn = self.last_turn.next();
        self.last_turn = turn;
        self.live = Some(LiveTurn::new(turn, reply));
        self.update(|s| {
            s.clear_turn();
            s.turn = Some(turn);
        });
        self.set_state(TurnState::Capturing);

        // Opened off the loop; the result comes back as `DeviceOpened`
        let acquire = self.capture.acquire();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = acquire.await;
            let _ = tx.send(Internal::DeviceOpened { turn, result });
        });
        tracing::debug!(turn = %turn, "opening microphone");
    }

    fn on_device_opened(&mut self, turn: TurnId, result: Result<DeviceHandle>) {
        let Some(reply) = self
            .live
            .as_mut()
            .filter(|live| live.id == turn)
            .and_then(|live| live.opening.take())
        else {
            // Dropping the handle releases the device
            tracing::debug!(turn = %turn, "discarding device opened for abandoned turn");
            return;
        };

        let armed = result.and_then(|handle| {
            self.capture.install(handle);
            self.capture.arm()
        });
        if let Err(e) = armed {
            self.capture.abort();
            self.fail(&e, Stage::Capture);
            reply.send(Err(e));
            return;
        }

        if let Some(deadline) = self.capture.deadline() {
            let tx = self.internal_tx.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                let _ = tx.send(Internal::AutoStop(turn));
            });
            if let Some(live) = self.live.as_mut() {
                live.auto_stop = Some(timer);
            }
        }

        tracing::info!(turn = %turn, "turn started");
        reply.send(Ok(turn));
    }

    fn stop_capture(&mut self) -> Result<TurnState> {
        let state = self.state();
        let Some(live) = self.live.as_mut().filter(|_| state == TurnState::Capturing) else {
            return Err(Error::InvalidState {
                action: "stop capturing",
                state,
            });
        };
        if live.opening.is_some() {
            // Nothing recorded yet
            self.capture.abort();
            self.cancel_turn();
            return Ok(TurnState::Idle);
        }
        live.cancel_timer();
        let turn = live.id;

        let recording = match self.capture.finalize(turn) {
            Ok(recording) => recording,
            Err(e) => {
                self.fail(&e, Stage::Capture);
                return Err(e);
            }
        };

        self.set_state(TurnState::Processing);

        let pipeline = self.pipeline.clone();
        let tx = self.internal_tx.clone();
        let task = tokio::spawn(async move {
            let events = tx.clone();
            let result = pipeline
                .run(recording, move |event| {
                    let _ = events.send(Internal::Pipeline { turn, event });
                })
                .await;
            let _ = tx.send(Internal::PipelineDone { turn, result });
        });

        if let Some(live) = self.live.as_mut() {
            live.pipeline = Some(task);
        }

        Ok(TurnState::Processing)
    }

    fn end_turn(&mut self) {
        match self.state() {
            TurnState::Idle => {}
            TurnState::Error => self.clear_error(),
            TurnState::Capturing => {
                self.capture.abort();
                self.cancel_turn();
            }
            TurnState::Processing | TurnState::Playing => {
                self.playback.abort();
                self.cancel_turn();
            }
        }
    }

    fn cancel_turn(&mut self) {
        if let Some(mut live) = self.live.take() {
            live.cancel();
            tracing::info!(turn = %live.id, "turn cancelled");
            self.finish(TurnOutcome::Cancelled { turn: live.id });
        }
    }

    fn on_pipeline_event(&mut self, turn: TurnId, event: PipelineEvent) {
        if !self.is_live(turn) {
            tracing::debug!(turn = %turn, "ignoring event from abandoned turn");
            return;
        }

        match event {
            PipelineEvent::Transcribed(transcript) => {
                self.update(|s| s.transcript = Some(transcript.text));
            }
            PipelineEvent::Segment(segment) => {
                let index = segment.index;
                self.playback.enqueue(segment);
                tracing::debug!(
                    turn = %turn,
                    index,
                    playing = ?self.playback.playing(),
                    pending = self.playback.pending(),
                    "segment enqueued"
                );
                self.update(|s| s.segments_enqueued += 1);
                if self.state() == TurnState::Processing {
                    self.set_state(TurnState::Playing);
                }
            }
        }
    }

    fn on_pipeline_done(&mut self, turn: TurnId, result: Result<PipelineOutcome>) {
        let Some(live) = self.live.as_mut().filter(|live| live.id == turn) else {
            tracing::debug!(turn = %turn, "ignoring result from abandoned turn");
            return;
        };
        live.pipeline = None;
        live.pipeline_done = true;

        match result {
            Ok(PipelineOutcome::NoSpeechDetected) => {
                self.live = None;
                self.finish(TurnOutcome::NoSpeech { turn });
            }
            Ok(PipelineOutcome::Completed { segments }) => {
                tracing::debug!(turn = %turn, segments, "pipeline complete");
                if self.playback.is_idle() {
                    self.complete(turn);
                }
            }
            Err(e) => {
                tracing::error!(turn = %turn, error = %e, "turn failed");
                // Segments already enqueued keep playing
                self.fail(&e, Stage::Transcription);
            }
        }
    }

    fn on_playback_finished(&mut self, report: &SegmentFinished) {
        let Some(advance) = self.playback.on_segment_finished(report) else {
            return;
        };
        if !self.is_live(report.turn) {
            return;
        }

        self.update(|s| {
            s.segments_played += 1;
            if let Some(message) = &report.error {
                s.playback_failures.push(PlaybackFailure {
                    index: report.index,
                    message: message.clone(),
                });
            }
        });

        match advance {
            QueueAdvance::Next(index) => {
                tracing::debug!(turn = %report.turn, index, "next segment playing");
            }
            QueueAdvance::Waiting => {
                tracing::debug!(turn = %report.turn, "waiting for an earlier segment");
            }
            QueueAdvance::Drained => {
                let pipeline_done = self.live.as_ref().is_some_and(|live| live.pipeline_done);
                if pipeline_done && self.state() == TurnState::Playing {
                    self.complete(report.turn);
                }
            }
        }
    }

    /// Pipeline finished and playback drained
    fn complete(&mut self, turn: TurnId) {
        self.live = None;
        let (segments, playback_failures) = {
            let status = self.status.borrow();
            (status.segments_enqueued, status.playback_failures.len())
        };
        tracing::info!(turn = %turn, segments, playback_failures, "turn complete");
        self.finish(TurnOutcome::Completed {
            turn,
            segments,
            playback_failures,
        });
    }

    /// Return to idle, discarding turn-scoped data
    fn finish(&self, outcome: TurnOutcome) {
        self.update(|s| {
            s.clear_turn();
            s.last_outcome = Some(outcome);
        });
        self.set_state(TurnState::Idle);
    }

    /// Enter `Error` with detail for the user
    fn fail(&mut self, error: &Error, fallback: Stage) {
        if let Some(live) = self.live.as_mut() {
            live.cancel_timer();
        }
        let detail = TurnError::from_error(error, fallback);
        tracing::warn!(stage = %detail.stage, error = %detail.message, "turn entered error state");
        // Segment counters stay for playback that outlives the failure
        self.update(|s| {
            s.transcript = None;
            s.last_error = Some(detail);
        });
        self.set_state(TurnState::Error);
    }

    /// Acknowledge an error: stop leftover playback and return to idle
    fn clear_error(&mut self) {
        self.playback.abort();
        let turn = self.live.take().map(|mut live| {
            live.cancel();
            live.id
        });
        let error = self.status.borrow().last_error.clone();

        let outcome = match (turn, error) {
            (Some(turn), Some(error)) => Some(TurnOutcome::Failed { turn, error }),
            _ => None,
        };

        self.update(|s| {
            s.clear_turn();
            if outcome.is_some() {
                s.last_outcome = outcome;
            }
        });
        self.set_state(TurnState::Idle);
    }
}
