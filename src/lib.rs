//! voxturn - voice turn controller for push-to-talk assistants
//!
//! One turn at a time: capture an utterance, send it through remote
//! speech-to-text, a dialogue engine and text-to-speech, then play the
//! replies back in order.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Control surfaces                       │
//! │   HTTP API  │  CLI (talk)  │  ControllerHandle      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              PipelineController                     │
//! │   CaptureSession → TurnPipeline → PlaybackQueue     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Remote services                        │
//! │   Transcription  │  Dialogue  │  Synthesis          │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod pipeline;
pub mod services;
pub mod voice;

pub use config::Config;
pub use controller::{
    ControllerHandle, ControllerSettings, PipelineController, TurnOutcome, TurnState, TurnStatus,
};
pub use error::{Error, Result, Stage, TurnError};
pub use pipeline::{PipelineEvent, PipelineOutcome, PipelineSettings, TurnPipeline};
pub use services::{DialogueEngine, DialogueReply, Services, Synthesizer, Transcriber};
