//! Voice I/O
//!
//! Microphone capture, turn data types, and serialized playback of
//! synthesized replies. Remote STT/dialogue/TTS live in `services`.

mod capture;
mod decode;
mod playback;
mod types;

pub use capture::{
    CaptureConstraints, CaptureSession, DEFAULT_SAMPLE_RATE, DeviceHandle, InputDevice,
    MAX_CAPTURE_DURATION, MicrophoneInput, encode_recording, samples_to_wav,
};
pub use decode::{DecodedAudio, decode_audio, resample};
pub use playback::{
    AudioSink, PLAYBACK_SAMPLE_RATE, PlaybackQueue, QueueAdvance, SegmentFinished, SpeakerOutput,
};
pub use types::{AudioSegment, RECORDING_MEDIA_TYPE, Recording, ReplyMessage, Transcript, TurnId};
