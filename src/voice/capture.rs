//! Microphone capture: device acquisition and the per-turn capture session

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::types::{RECORDING_MEDIA_TYPE, Recording, TurnId};
use crate::{Error, Result};

/// Default capture sample rate
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Longest a capture session may stay armed before it stops itself
pub const MAX_CAPTURE_DURATION: Duration = Duration::from_secs(25);

/// Signal-processing options requested when opening the microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Request echo cancellation
    pub echo_cancellation: bool,
    /// Request noise suppression
    pub noise_suppression: bool,
    /// Requested sample rate in Hz
    pub sample_rate: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Exclusive handle on an open input device
///
/// Audio arrives as chunks of mono f32 samples. The device is released when
/// the handle is dropped.
pub struct DeviceHandle {
    sample_rate: u32,
    chunks: mpsc::UnboundedReceiver<Vec<f32>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl DeviceHandle {
    /// Wrap a chunk stream and the action that releases the device
    pub fn new(
        sample_rate: u32,
        chunks: mpsc::UnboundedReceiver<Vec<f32>>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            sample_rate,
            chunks,
            release: Some(Box::new(release)),
        }
    }

    /// Actual sample rate of delivered chunks
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Wait for the next chunk; `None` once the device stops delivering
    pub async fn next_chunk(&mut self) -> Option<Vec<f32>> {
        self.chunks.recv().await
    }

    /// Take every chunk delivered so far, concatenated
    fn drain(&mut self) -> Vec<f32> {
        let mut samples = Vec::new();
        while let Ok(chunk) = self.chunks.try_recv() {
            samples.extend_from_slice(&chunk);
        }
        samples
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Source of microphone audio
#[async_trait]
pub trait InputDevice: Send + Sync {
    /// Acquire the device with the given processing options
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if access is denied or no device exists
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<DeviceHandle>;
}

/// Owns the microphone for one turn and produces exactly one recording
pub struct CaptureSession {
    device: Arc<dyn InputDevice>,
    constraints: CaptureConstraints,
    max_duration: Duration,
    handle: Option<DeviceHandle>,
    armed_at: Option<Instant>,
}

impl CaptureSession {
    /// Create an idle session over `device`
    #[must_use]
    pub fn new(
        device: Arc<dyn InputDevice>,
        constraints: CaptureConstraints,
        max_duration: Duration,
    ) -> Self {
        Self {
            device,
            constraints,
            max_duration,
            handle: None,
            armed_at: None,
        }
    }

    /// Acquire the input device
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the device cannot be opened
    pub async fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let handle = self.acquire().await?;
        self.install(handle);
        Ok(())
    }

    /// Acquisition detached from the session, for callers that must not
    /// block while the device opens
    ///
    /// Hand the result to [`install`](Self::install).
    pub fn acquire(&self) -> impl Future<Output = Result<DeviceHandle>> + Send + 'static {
        let device = Arc::clone(&self.device);
        let constraints = self.constraints;
        async move {
            device.acquire(&constraints).await.map_err(|e| match e {
                Error::DeviceUnavailable(_) => e,
                other => Error::DeviceUnavailable(other.to_string()),
            })
        }
    }

    /// Take ownership of an acquired device, replacing any held one
    pub fn install(&mut self, handle: DeviceHandle) {
        tracing::debug!(sample_rate = handle.sample_rate(), "input device acquired");
        self.armed_at = None;
        self.handle = Some(handle);
    }

    /// Start buffering audio; anything delivered before this is discarded
    ///
    /// # Errors
    ///
    /// Returns `AlreadyArmed` if buffering is in progress, or
    /// `DeviceUnavailable` if the device was never opened
    pub fn arm(&mut self) -> Result<()> {
        if self.armed_at.is_some() {
            return Err(Error::AlreadyArmed);
        }

        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| Error::DeviceUnavailable("input device not open".to_string()))?;

        let stale = handle.drain();
        if !stale.is_empty() {
            tracing::trace!(samples = stale.len(), "discarded pre-arm audio");
        }

        self.armed_at = Some(Instant::now());
        tracing::debug!("capture armed");
        Ok(())
    }

    /// Stop buffering, release the device and produce the recording
    ///
    /// # Errors
    ///
    /// Returns `NotArmed` if the session is not buffering, or an audio
    /// error if WAV encoding fails
    pub fn finalize(&mut self, turn: TurnId) -> Result<Recording> {
        if self.armed_at.take().is_none() {
            return Err(Error::NotArmed);
        }

        let Some(mut handle) = self.handle.take() else {
            return Err(Error::NotArmed);
        };

        let samples = handle.drain();
        let sample_rate = handle.sample_rate();
        drop(handle);

        tracing::debug!(turn = %turn, samples = samples.len(), "capture finalized");
        encode_recording(turn, &samples, sample_rate)
    }

    /// Discard buffered audio and release the device
    pub fn abort(&mut self) {
        let was_open = self.handle.take().is_some();
        self.armed_at = None;
        if was_open {
            tracing::debug!("capture aborted");
        }
    }

    /// Whether the device is currently held
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether audio is being buffered
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    /// Time at which an armed session stops itself
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.armed_at.map(|at| at + self.max_duration)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Wrap captured samples as a WAV recording
///
/// No samples yields a recording with empty data so callers can detect it.
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn encode_recording(turn: TurnId, samples: &[f32], sample_rate: u32) -> Result<Recording> {
    let data = if samples.is_empty() {
        Vec::new()
    } else {
        samples_to_wav(samples, sample_rate)?
    };

    Ok(Recording::new(turn, RECORDING_MEDIA_TYPE, data))
}

/// Convert f32 samples to 16-bit mono WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Default system microphone via cpal
///
/// The cpal stream lives on its own thread for as long as the returned
/// handle is held.
#[derive(Debug, Default, Clone, Copy)]
pub struct MicrophoneInput;

#[async_trait]
impl InputDevice for MicrophoneInput {
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<DeviceHandle> {
        let constraints = *constraints;
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("voxturn-capture".to_string())
            .spawn(move || run_input_stream(constraints, chunk_tx, ready_tx, &stop_rx))?;

        let sample_rate = ready_rx
            .await
            .map_err(|_| Error::DeviceUnavailable("capture thread exited".to_string()))??;

        Ok(DeviceHandle::new(sample_rate, chunk_rx, move || {
            let _ = stop_tx.send(());
        }))
    }
}

/// Hold an input stream open until the handle is released
fn run_input_stream(
    constraints: CaptureConstraints,
    chunk_tx: mpsc::UnboundedSender<Vec<f32>>,
    ready_tx: oneshot::Sender<Result<u32>>,
    stop_rx: &std::sync::mpsc::Receiver<()>,
) {
    let stream = match open_input_stream(&constraints, chunk_tx) {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(constraints.sample_rate));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    // Returns on explicit release or when the sender is dropped
    let _ = stop_rx.recv();
    drop(stream);
    tracing::debug!("audio capture stopped");
}

fn open_input_stream(
    constraints: &CaptureConstraints,
    chunk_tx: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<Stream> {
    let host = cpal::default_host();
    let rate = SampleRate(constraints.sample_rate);

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
        .find(|c| c.channels() == 1 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .ok_or_else(|| Error::DeviceUnavailable("no suitable audio config found".to_string()))?;

    let config = supported_config.with_sample_rate(rate).config();

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = chunk_tx.send(data.to_vec());
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = constraints.sample_rate,
        echo_cancellation = constraints.echo_cancellation,
        noise_suppression = constraints.noise_suppression,
        "audio capture started"
    );

    Ok(stream)
}
