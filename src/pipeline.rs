//! Turn pipeline: recording → transcript → replies → audio segments
//!
//! The three remote calls run strictly in sequence. Segments are emitted as
//! soon as each synthesis call returns, so playback of segment `i` can
//! overlap synthesis of segment `i + 1`.

use crate::services::{DialogueReply, Services};
use crate::voice::{AudioSegment, Recording, ReplyMessage, Transcript, TurnId};
use crate::{Error, Result, Stage};

/// Sender identity and default voice used for every turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Sender identity passed to the dialogue service
    pub sender: String,
    /// Language tag used when a reply does not carry its own
    pub language: String,
}

/// Progress reported while a turn runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Transcription produced non-blank text
    Transcribed(Transcript),
    /// A reply was synthesized
    Segment(AudioSegment),
}

/// How a turn ended when no stage failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Transcript was empty or whitespace; dialogue and synthesis were skipped
    NoSpeechDetected,
    /// Every reply was synthesized
    Completed {
        /// Number of segments emitted
        segments: usize,
    },
}

/// Drives one recording through the three remote stages
#[derive(Clone)]
pub struct TurnPipeline {
    services: Services,
    settings: PipelineSettings,
}

impl TurnPipeline {
    /// Create a pipeline over `services`
    #[must_use]
    pub const fn new(services: Services, settings: PipelineSettings) -> Self {
        Self { services, settings }
    }

    /// Run one turn, calling `emit` for each transcript and segment
    ///
    /// # Errors
    ///
    /// Returns `EmptyRecording` without contacting any service when the
    /// recording holds no audio; otherwise the stage-tagged error of the
    /// first failing call. Segments emitted before a failure stay emitted.
    pub async fn run<F>(&self, recording: Recording, mut emit: F) -> Result<PipelineOutcome>
    where
        F: FnMut(PipelineEvent) + Send,
    {
        let turn = recording.turn();

        if recording.is_empty() {
            tracing::warn!(turn = %turn, "empty recording rejected");
            return Err(Error::EmptyRecording);
        }

        let text = self
            .services
            .transcriber
            .transcribe(&recording)
            .await
            .map_err(|e| tag(e, Stage::Transcription))?;
        drop(recording);

        let transcript = Transcript { turn, text };
        if transcript.is_blank() {
            tracing::info!(turn = %turn, "no speech detected");
            return Ok(PipelineOutcome::NoSpeechDetected);
        }

        let message = transcript.text.clone();
        emit(PipelineEvent::Transcribed(transcript));

        let replies = self
            .services
            .dialogue
            .exchange(&self.settings.sender, &message)
            .await
            .map_err(|e| tag(e, Stage::Dialogue))?;

        let messages = self.speakable(turn, replies);
        tracing::debug!(turn = %turn, messages = messages.len(), "synthesizing replies");

        for (index, reply) in messages.iter().enumerate() {
            let data = self
                .services
                .synthesizer
                .synthesize(&reply.text, &reply.lang)
                .await
                .map_err(|e| tag(e, Stage::Synthesis))?;

            emit(PipelineEvent::Segment(AudioSegment { turn, index, data }));
        }

        Ok(PipelineOutcome::Completed {
            segments: messages.len(),
        })
    }

    /// Keep replies with text, in order, filling in the default language
    fn speakable(&self, turn: TurnId, replies: Vec<DialogueReply>) -> Vec<ReplyMessage> {
        replies
            .into_iter()
            .filter_map(|reply| {
                let Some(text) = reply.text.filter(|t| !t.trim().is_empty()) else {
                    tracing::debug!(turn = %turn, "skipping reply without text");
                    return None;
                };
                Some(ReplyMessage {
                    text,
                    lang: reply.lang.unwrap_or_else(|| self.settings.language.clone()),
                })
            })
            .collect()
    }
}

/// Make sure an error from `stage` carries that stage
fn tag(error: Error, stage: Stage) -> Error {
    if error.stage() == Some(stage) {
        return error;
    }

    let message = error.to_string();
    match stage {
        Stage::Transcription => Error::TranscriptionFailed(message),
        Stage::Dialogue => Error::DialogueFailed(message),
        Stage::Synthesis => Error::SynthesisFailed(message),
        Stage::Capture | Stage::Playback => error,
    }
}
