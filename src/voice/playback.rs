//! Serialized playback of synthesized segments

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::decode::{decode_audio, resample};
use super::types::{AudioSegment, TurnId};
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Audio output for one segment at a time
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `segment` to completion
    ///
    /// Dropping the returned future must stop output immediately.
    ///
    /// # Errors
    ///
    /// Returns `PlaybackFailed` on device or decoding errors
    async fn play(&self, segment: &AudioSegment) -> Result<()>;
}

/// Report sent when a segment stops playing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFinished {
    /// Owning turn
    pub turn: TurnId,
    /// Segment index within the reply
    pub index: usize,
    /// Failure message, if the segment could not be played
    pub error: Option<String>,
}

/// What the queue did after a segment finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAdvance {
    /// Started playing the segment with this index
    Next(usize),
    /// Nothing queued or playing
    Drained,
    /// Waiting for an earlier segment that has not arrived yet
    Waiting,
}

struct Playing {
    turn: TurnId,
    index: usize,
    task: JoinHandle<()>,
}

/// Plays segments strictly in ascending index order, one at a time
///
/// Completion of each segment is reported as a [`SegmentFinished`] on the
/// events channel; the owner feeds it back through
/// [`PlaybackQueue::on_segment_finished`] to advance.
pub struct PlaybackQueue {
    sink: Arc<dyn AudioSink>,
    events: mpsc::UnboundedSender<SegmentFinished>,
    turn: Option<TurnId>,
    next_index: usize,
    held: BTreeMap<usize, AudioSegment>,
    queued: VecDeque<AudioSegment>,
    current: Option<Playing>,
}

impl PlaybackQueue {
    /// Create an empty queue playing through `sink`
    #[must_use]
    pub fn new(sink: Arc<dyn AudioSink>, events: mpsc::UnboundedSender<SegmentFinished>) -> Self {
        Self {
            sink,
            events,
            turn: None,
            next_index: 0,
            held: BTreeMap::new(),
            queued: VecDeque::new(),
            current: None,
        }
    }

    /// Append a segment, starting playback if nothing is playing
    ///
    /// A segment that arrives ahead of its predecessors is held back until
    /// the gap is filled.
    pub fn enqueue(&mut self, segment: AudioSegment) {
        if self.turn != Some(segment.turn) {
            if !self.is_idle() {
                tracing::warn!(turn = %segment.turn, "segment from new turn while playing; resetting queue");
                self.abort();
            }
            self.turn = Some(segment.turn);
            self.next_index = 0;
        }

        if segment.index < self.next_index {
            tracing::warn!(turn = %segment.turn, index = segment.index, "duplicate segment ignored");
            return;
        }

        self.held.insert(segment.index, segment);
        while let Some(ready) = self.held.remove(&self.next_index) {
            self.queued.push_back(ready);
            self.next_index += 1;
        }

        if self.current.is_none() {
            self.start_next();
        }
    }

    /// Advance after a segment finished
    ///
    /// Returns `None` for reports that do not match the segment currently
    /// playing (e.g. after [`abort`](Self::abort)).
    pub fn on_segment_finished(&mut self, report: &SegmentFinished) -> Option<QueueAdvance> {
        match &self.current {
            Some(playing) if playing.turn == report.turn && playing.index == report.index => {}
            _ => {
                tracing::trace!(turn = %report.turn, index = report.index, "stale playback report");
                return None;
            }
        }
        self.current = None;

        if let Some(error) = &report.error {
            tracing::warn!(turn = %report.turn, index = report.index, error = %error, "segment playback failed");
        } else {
            tracing::debug!(turn = %report.turn, index = report.index, "segment played");
        }

        if let Some(index) = self.start_next() {
            Some(QueueAdvance::Next(index))
        } else if self.held.is_empty() {
            tracing::debug!(turn = %report.turn, "playback drained");
            Some(QueueAdvance::Drained)
        } else {
            Some(QueueAdvance::Waiting)
        }
    }

    /// Stop current playback and clear everything queued
    ///
    /// No report is produced for the interrupted segment.
    pub fn abort(&mut self) {
        if let Some(playing) = self.current.take() {
            playing.task.abort();
            tracing::debug!(turn = %playing.turn, index = playing.index, "playback aborted");
        }
        self.queued.clear();
        self.held.clear();
        self.turn = None;
        self.next_index = 0;
    }

    /// Whether nothing is playing, queued or held back
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.queued.is_empty() && self.held.is_empty()
    }

    /// Index of the segment currently playing
    #[must_use]
    pub fn playing(&self) -> Option<usize> {
        self.current.as_ref().map(|p| p.index)
    }

    /// Segments waiting behind the current one
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queued.len() + self.held.len()
    }

    fn start_next(&mut self) -> Option<usize> {
        let segment = self.queued.pop_front()?;
        let turn = segment.turn;
        let index = segment.index;
        let sink = Arc::clone(&self.sink);
        let events = self.events.clone();

        tracing::debug!(turn = %turn, index, bytes = segment.data.len(), "playing segment");

        let task = tokio::spawn(async move {
            let result = sink.play(&segment).await;
            let _ = events.send(SegmentFinished {
                turn,
                index,
                error: result.err().map(|e| e.to_string()),
            });
        });

        self.current = Some(Playing { turn, index, task });
        Some(index)
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Plays audio to the default output device
pub struct SpeakerOutput {
    config: StreamConfig,
}

impl SpeakerOutput {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let rate = SampleRate(PLAYBACK_SAMPLE_RATE);

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| c.channels() == 1 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config.with_sample_rate(rate).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }
}

#[async_trait]
impl AudioSink for SpeakerOutput {
    async fn play(&self, segment: &AudioSegment) -> Result<()> {
        let decoded = decode_audio(&segment.data)?;
        let samples = resample(&decoded.samples, decoded.sample_rate, PLAYBACK_SAMPLE_RATE)?;

        let stop = Arc::new(AtomicBool::new(false));
        let _guard = StopOnDrop(Arc::clone(&stop));
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || play_samples_blocking(&config, samples, &stop))
            .await
            .map_err(|e| Error::PlaybackFailed(e.to_string()))?
    }
}

/// Raises the stop flag when the owning future is dropped
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Play samples on the calling thread until done or stopped
fn play_samples_blocking(config: &StreamConfig, samples: Vec<f32>, stop: &AtomicBool) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::PlaybackFailed("no output device".to_string()))?;

    let channels = usize::from(config.channels);
    let sample_count = samples.len();
    let samples = Arc::new(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);

        device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let pos = position.load(Ordering::Relaxed);
                        let sample = if let Some(&s) = samples.get(pos) {
                            position.store(pos + 1, Ordering::Relaxed);
                            s
                        } else {
                            finished.store(true, Ordering::SeqCst);
                            0.0
                        };
                        frame.fill(sample);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::PlaybackFailed(e.to_string()))?
    };

    stream
        .play()
        .map_err(|e| Error::PlaybackFailed(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
    let timeout = Duration::from_millis(duration_ms + 500);
    let start = Instant::now();

    while !finished.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);

    if stop.load(Ordering::SeqCst) {
        tracing::debug!(samples = sample_count, "playback stopped early");
    } else {
        tracing::debug!(samples = sample_count, "playback complete");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records play order and finishes instantly
    #[derive(Default)]
    struct RecordingSink {
        played: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn play(&self, segment: &AudioSegment) -> Result<()> {
            self.played.lock().unwrap().push(segment.index);
            if segment.data == b"bad" {
                return Err(Error::PlaybackFailed("undecodable".to_string()));
            }
            Ok(())
        }
    }

    fn segment(turn: u64, index: usize) -> AudioSegment {
        AudioSegment {
            turn: TurnId::new(turn),
            index,
            data: vec![1, 2, 3],
        }
    }

    async fn drive(
        queue: &mut PlaybackQueue,
        rx: &mut mpsc::UnboundedReceiver<SegmentFinished>,
    ) -> Vec<QueueAdvance> {
        let mut advances = Vec::new();
        while let Some(report) = rx.recv().await {
            let advance = queue.on_segment_finished(&report).unwrap();
            advances.push(advance);
            if advance == QueueAdvance::Drained {
                break;
            }
        }
        advances
    }

    #[tokio::test]
    async fn plays_in_order_and_drains() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut queue = PlaybackQueue::new(sink.clone(), tx);

        queue.enqueue(segment(1, 0));
        queue.enqueue(segment(1, 1));
        assert_eq!(queue.playing(), Some(0));
        assert_eq!(queue.pending(), 1);

        let advances = drive(&mut queue, &mut rx).await;
        assert_eq!(advances, vec![QueueAdvance::Next(1), QueueAdvance::Drained]);
        assert_eq!(*sink.played.lock().unwrap(), vec![0, 1]);
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn holds_out_of_order_segment_until_gap_fills() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut queue = PlaybackQueue::new(sink.clone(), tx);

        queue.enqueue(segment(1, 1));
        assert_eq!(queue.playing(), None);
        assert!(!queue.is_idle());

        queue.enqueue(segment(1, 0));
        assert_eq!(queue.playing(), Some(0));

        drive(&mut queue, &mut rx).await;
        assert_eq!(*sink.played.lock().unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn failed_segment_does_not_halt_queue() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut queue = PlaybackQueue::new(sink.clone(), tx);

        let mut bad = segment(1, 0);
        bad.data = b"bad".to_vec();
        queue.enqueue(bad);
        queue.enqueue(segment(1, 1));

        let first = rx.recv().await.unwrap();
        assert!(first.error.is_some());
        assert_eq!(queue.on_segment_finished(&first), Some(QueueAdvance::Next(1)));

        let second = rx.recv().await.unwrap();
        assert!(second.error.is_none());
        assert_eq!(queue.on_segment_finished(&second), Some(QueueAdvance::Drained));
    }

    #[tokio::test]
    async fn abort_clears_queue_and_ignores_late_reports() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut queue = PlaybackQueue::new(sink, tx);

        queue.enqueue(segment(1, 0));
        queue.enqueue(segment(1, 1));
        queue.abort();
        assert!(queue.is_idle());

        let late = SegmentFinished {
            turn: TurnId::new(1),
            index: 0,
            error: None,
        };
        assert_eq!(queue.on_segment_finished(&late), None);

        // Anything the aborted task managed to send is stale too
        while let Ok(report) = rx.try_recv() {
            assert_eq!(queue.on_segment_finished(&report), None);
        }
    }

    #[tokio::test]
    async fn duplicate_index_is_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut queue = PlaybackQueue::new(sink.clone(), tx);

        queue.enqueue(segment(1, 0));
        queue.enqueue(segment(1, 0));
        assert_eq!(queue.pending(), 0);

        drive(&mut queue, &mut rx).await;
        assert_eq!(*sink.played.lock().unwrap(), vec![0]);
    }
}
