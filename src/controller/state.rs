//! Turn state machine and the status snapshot published to observers

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::TurnError;
use crate::voice::TurnId;

/// Controller state
///
/// `Idle → Capturing → Processing → Playing → Idle`, with `Error` reachable
/// from `Capturing` and `Processing` (and from `Playing` when synthesis of a
/// later segment fails) and left only back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Waiting for a turn to start
    #[default]
    Idle,
    /// Microphone armed
    Capturing,
    /// Recording in flight through the remote stages
    Processing,
    /// At least one reply segment enqueued for playback
    Playing,
    /// A stage failed; cleared by the next start or end action
    Error,
}

impl TurnState {
    /// Whether the state machine permits moving from `self` to `next`
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Error, Self::Capturing)
                | (Self::Capturing, Self::Processing | Self::Idle | Self::Error)
                | (Self::Processing, Self::Playing | Self::Idle | Self::Error)
                | (Self::Playing, Self::Idle | Self::Error)
                | (Self::Error, Self::Idle)
        )
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Processing => "processing",
            Self::Playing => "playing",
            Self::Error => "in error",
        };
        f.write_str(name)
    }
}

/// One segment that could not be played
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackFailure {
    /// Segment index
    pub index: usize,
    /// Failure message
    pub message: String,
}

/// Summary of how the previous turn ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// All replies played (some may have failed to play)
    Completed {
        /// Turn id
        turn: TurnId,
        /// Segments produced
        segments: usize,
        /// Segments that failed to play
        playback_failures: usize,
    },
    /// Nothing was said
    NoSpeech {
        /// Turn id
        turn: TurnId,
    },
    /// Ended by the user
    Cancelled {
        /// Turn id
        turn: TurnId,
    },
    /// A stage failed and the error was acknowledged
    Failed {
        /// Turn id
        turn: TurnId,
        /// Failure detail
        error: TurnError,
    },
}

/// Snapshot of the controller, published on every change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnStatus {
    /// Current state
    pub state: TurnState,
    /// Readiness gate; `start_turn` is refused while false
    pub ready: bool,
    /// Live turn, if any
    pub turn: Option<TurnId>,
    /// Transcript of the live turn
    pub transcript: Option<String>,
    /// Segments handed to playback for the live turn
    pub segments_enqueued: usize,
    /// Segments that finished playing (or failed) for the live turn
    pub segments_played: usize,
    /// Playback failures for the live turn
    pub playback_failures: Vec<PlaybackFailure>,
    /// Failure detail while in `Error`
    pub last_error: Option<TurnError>,
    /// How the previous turn ended
    pub last_outcome: Option<TurnOutcome>,
    /// Time of the last change
    pub updated_at: DateTime<Utc>,
}

impl TurnStatus {
    /// Initial idle status
    #[must_use]
    pub fn new(ready: bool) -> Self {
        Self {
            state: TurnState::Idle,
            ready,
            turn: None,
            transcript: None,
            segments_enqueued: 0,
            segments_played: 0,
            playback_failures: Vec::new(),
            last_error: None,
            last_outcome: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether a start action would be accepted
    #[must_use]
    pub const fn can_start(&self) -> bool {
        self.ready && matches!(self.state, TurnState::Idle | TurnState::Error)
    }

    /// Drop everything scoped to the live turn
    pub(crate) fn clear_turn(&mut self) {
        self.turn = None;
        self.transcript = None;
        self.segments_enqueued = 0;
        self.segments_played = 0;
        self.playback_failures.clear();
        self.last_error = None;
    }
}
