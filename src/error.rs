//! Error types for the voice turn controller

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::controller::TurnState;

/// Result type alias for voxturn operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a turn
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access denied or no input device present
    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),

    /// Capture session is already buffering
    #[error("capture session already armed")]
    AlreadyArmed,

    /// Capture session is not buffering
    #[error("capture session not armed")]
    NotArmed,

    /// Capture finished without any audio
    #[error("recording is empty")]
    EmptyRecording,

    /// Transcription service failed or answered non-2xx
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// Dialogue service failed or answered non-2xx
    #[error("dialogue failed: {0}")]
    DialogueFailed(String),

    /// Synthesis service failed or answered non-2xx
    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    /// A single segment could not be played
    #[error("playback failed: {0}")]
    PlaybackFailed(String),

    /// Readiness gate is closed
    #[error("system is not ready")]
    NotReady,

    /// Action not permitted in the current state
    #[error("cannot {action} while {state}")]
    InvalidState {
        /// Rejected action
        action: &'static str,
        /// State the controller was in
        state: TurnState,
    },

    /// Turn ended while the microphone was still opening
    #[error("turn cancelled before capture began")]
    Cancelled,

    /// Controller task has stopped
    #[error("controller is not running")]
    ControllerClosed,

    /// Audio device or codec error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Pipeline stage this error belongs to, if any
    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::DeviceUnavailable(_)
            | Self::AlreadyArmed
            | Self::NotArmed
            | Self::EmptyRecording => Some(Stage::Capture),
            Self::TranscriptionFailed(_) => Some(Stage::Transcription),
            Self::DialogueFailed(_) => Some(Stage::Dialogue),
            Self::SynthesisFailed(_) => Some(Stage::Synthesis),
            Self::PlaybackFailed(_) => Some(Stage::Playback),
            _ => None,
        }
    }
}

/// Stage of a turn in which a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Microphone acquisition and recording
    Capture,
    /// Speech-to-text
    Transcription,
    /// Dialogue exchange
    Dialogue,
    /// Text-to-speech
    Synthesis,
    /// Audio output
    Playback,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Capture => "capture",
            Self::Transcription => "transcription",
            Self::Dialogue => "dialogue",
            Self::Synthesis => "synthesis",
            Self::Playback => "playback",
        };
        f.write_str(name)
    }
}

/// User-visible failure detail attached to the `Error` state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnError {
    /// Failing stage
    pub stage: Stage,
    /// Human-readable message
    pub message: String,
}

impl TurnError {
    /// Build from a library error, defaulting to `fallback` when the error
    /// carries no stage of its own
    #[must_use]
    pub fn from_error(error: &Error, fallback: Stage) -> Self {
        Self {
            stage: error.stage().unwrap_or(fallback),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage: {}", self.stage, self.message)
    }
}
