//! Text-to-speech over HTTP

use async_trait::async_trait;

use super::{Synthesizer, describe_failure};
use crate::{Error, Result};

/// Posts `{ text, lang }` and returns the audio body as-is
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
}

impl HttpSynthesizer {
    /// Create a client for the synthesis endpoint
    #[must_use]
    pub const fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct SynthesisRequest<'a> {
            text: &'a str,
            lang: &'a str,
        }

        tracing::debug!(chars = text.len(), lang, "starting synthesis");

        let response = self
            .client
            .post(&self.url)
            .json(&SynthesisRequest { text, lang })
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "synthesis request failed");
                Error::SynthesisFailed(e.to_string())
            })?;

        if !response.status().is_success() {
            let detail = describe_failure(response).await;
            tracing::error!(detail = %detail, "synthesis service error");
            return Err(Error::SynthesisFailed(detail));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::SynthesisFailed(e.to_string()))?;

        tracing::debug!(audio_bytes = audio.len(), "synthesis complete");
        Ok(audio.to_vec())
    }
}
