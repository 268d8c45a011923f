//! Dialogue exchange over a REST webhook

use async_trait::async_trait;
use serde::Serialize;

use super::{DialogueEngine, DialogueReply, describe_failure};
use crate::{Error, Result};

#[derive(Serialize)]
struct DialogueRequest<'a> {
    sender: &'a str,
    message: &'a str,
}

/// Posts `{ sender, message }` and reads back an array of replies
pub struct HttpDialogue {
    client: reqwest::Client,
    url: String,
}

impl HttpDialogue {
    /// Create a client for the dialogue webhook
    #[must_use]
    pub const fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl DialogueEngine for HttpDialogue {
    async fn exchange(&self, sender: &str, message: &str) -> Result<Vec<DialogueReply>> {
        tracing::debug!(sender, message, "sending message to dialogue service");

        let response = self
            .client
            .post(&self.url)
            .json(&DialogueRequest { sender, message })
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "dialogue request failed");
                Error::DialogueFailed(e.to_string())
            })?;

        if !response.status().is_success() {
            let detail = describe_failure(response).await;
            tracing::error!(detail = %detail, "dialogue service error");
            return Err(Error::DialogueFailed(detail));
        }

        let replies: Vec<DialogueReply> = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse dialogue response");
            Error::DialogueFailed(e.to_string())
        })?;

        tracing::info!(replies = replies.len(), "dialogue exchange complete");
        Ok(replies)
    }
}
