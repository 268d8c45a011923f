//! Turn-scoped data passed between capture, pipeline and playback

use std::fmt;

use serde::Serialize;

/// Media type of recordings produced by the capture session
pub const RECORDING_MEDIA_TYPE: &str = "audio/wav";

/// Monotonically increasing turn identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct TurnId(u64);

impl TurnId {
    /// Create a turn id from its raw value
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Next id in sequence
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw value
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One finalized capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    turn: TurnId,
    media_type: String,
    data: Vec<u8>,
}

impl Recording {
    /// Create a recording
    #[must_use]
    pub fn new(turn: TurnId, media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            turn,
            media_type: media_type.into(),
            data,
        }
    }

    /// Owning turn
    #[must_use]
    pub const fn turn(&self) -> TurnId {
        self.turn
    }

    /// Declared media type (e.g. `audio/wav`)
    #[must_use]
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Encoded audio bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether no audio was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume into the encoded bytes
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Text recognized for one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// Owning turn
    pub turn: TurnId,
    /// Recognized text
    pub text: String,
}

impl Transcript {
    /// Whether the transcript contains no speech
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// One dialogue reply unit to be spoken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyMessage {
    /// Text to synthesize
    pub text: String,
    /// Target language / voice tag
    pub lang: String,
}

/// One synthesized reply, in reply order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    /// Owning turn
    pub turn: TurnId,
    /// Position within the reply, starting at 0
    pub index: usize,
    /// Encoded audio bytes as returned by the synthesis service
    pub data: Vec<u8>,
}
