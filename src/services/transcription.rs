//! Speech-to-text over HTTP

use async_trait::async_trait;

use super::{Transcriber, describe_failure};
use crate::voice::Recording;
use crate::{Error, Result};

/// Transcription service response
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    transcription: Option<String>,
}

/// Uploads recordings as `multipart/form-data` and reads back the text
pub struct HttpTranscriber {
    client: reqwest::Client,
    url: String,
}

impl HttpTranscriber {
    /// Create a client for the transcription endpoint
    #[must_use]
    pub const fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, recording: &Recording) -> Result<String> {
        tracing::debug!(
            turn = %recording.turn(),
            audio_bytes = recording.data().len(),
            media_type = recording.media_type(),
            "starting transcription"
        );

        let file_name = format!("recording.{}", file_extension(recording.media_type()));
        let part = reqwest::multipart::Part::bytes(recording.data().to_vec())
            .file_name(file_name)
            .mime_str(recording.media_type())
            .map_err(|e| Error::TranscriptionFailed(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                Error::TranscriptionFailed(e.to_string())
            })?;

        if !response.status().is_success() {
            let detail = describe_failure(response).await;
            tracing::error!(detail = %detail, "transcription service error");
            return Err(Error::TranscriptionFailed(detail));
        }

        let result: TranscriptionResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse transcription response");
            Error::TranscriptionFailed(e.to_string())
        })?;

        let text = result.transcription.unwrap_or_default();
        tracing::info!(turn = %recording.turn(), transcript = %text, "transcription complete");
        Ok(text)
    }
}

/// File extension matching a recording media type
fn file_extension(media_type: &str) -> &'static str {
    let essence = media_type.split(';').next().unwrap_or_default().trim();
    match essence {
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/webm" => "webm",
        "audio/ogg" => "ogg",
        "audio/opus" => "opus",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "audio/flac" | "audio/x-flac" => "flac",
        _ => "bin",
    }
}
