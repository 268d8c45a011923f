//! Remote service contracts used by the turn pipeline
//!
//! Each stage is a trait so the pipeline can be driven by the HTTP clients
//! in this module or by any other implementation:
//! - [`Transcriber`]: recorded audio to text
//! - [`DialogueEngine`]: user text to an ordered list of replies
//! - [`Synthesizer`]: reply text to audio

mod dialogue;
mod synthesis;
mod transcription;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::Result;
use crate::config::ServiceConfig;
use crate::voice::Recording;

pub use dialogue::HttpDialogue;
pub use synthesis::HttpSynthesizer;
pub use transcription::HttpTranscriber;

/// Speech-to-text stage
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a recording; a single attempt
    ///
    /// # Errors
    ///
    /// Returns `TranscriptionFailed` on transport errors or non-2xx responses
    async fn transcribe(&self, recording: &Recording) -> Result<String>;
}

/// Dialogue stage
#[async_trait]
pub trait DialogueEngine: Send + Sync {
    /// Exchange one user message for zero or more replies, in order
    ///
    /// # Errors
    ///
    /// Returns `DialogueFailed` on transport errors or non-2xx responses
    async fn exchange(&self, sender: &str, message: &str) -> Result<Vec<DialogueReply>>;
}

/// Text-to-speech stage
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` in `lang`; a single attempt
    ///
    /// # Errors
    ///
    /// Returns `SynthesisFailed` on transport errors or non-2xx responses
    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>>;
}

/// One entry of a dialogue response
///
/// Dialogue engines may answer with non-text entries (images, buttons);
/// those carry no `text`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DialogueReply {
    /// Reply text
    #[serde(default)]
    pub text: Option<String>,
    /// Per-reply language override
    #[serde(default)]
    pub lang: Option<String>,
}

impl DialogueReply {
    /// Text-only reply
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            lang: None,
        }
    }
}

/// The three stages a turn runs through
#[derive(Clone)]
pub struct Services {
    /// Speech-to-text
    pub transcriber: Arc<dyn Transcriber>,
    /// Dialogue exchange
    pub dialogue: Arc<dyn DialogueEngine>,
    /// Text-to-speech
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl Services {
    /// HTTP clients for the configured endpoints, sharing one connection pool
    #[must_use]
    pub fn http(config: &ServiceConfig) -> Self {
        let client = reqwest::Client::new();

        Self {
            transcriber: Arc::new(HttpTranscriber::new(
                client.clone(),
                config.transcription_url.clone(),
            )),
            dialogue: Arc::new(HttpDialogue::new(client.clone(), config.dialogue_url.clone())),
            synthesizer: Arc::new(HttpSynthesizer::new(client, config.synthesis_url.clone())),
        }
    }
}

/// Read a failed response into `"<status>: <body>"`
async fn describe_failure(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    }
}
