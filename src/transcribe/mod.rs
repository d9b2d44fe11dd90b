use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use crate::cancel::{self, CancelReason, CancelSignal};
use crate::config::TranscriptionConfig;
use crate::media::TRANSCRIPTION_AUDIO;
use crate::pipeline::{PartialKey, PipelineError, PipelineStep, Reporter};

pub mod stream;

use stream::{SseDecoder, SseFrame};

const STEP: PipelineStep = PipelineStep::TranscribeAudio;

/// Why a single request attempt did not produce a transcript
#[derive(Debug)]
enum AttemptError {
    /// Non-success HTTP status
    Status { status: StatusCode, body: String },
    /// The composed signal fired: per-attempt timeout or caller cancellation
    Interrupted(CancelReason),
    /// Connection, TLS, or mid-stream read failure
    Transport(anyhow::Error),
}

/// What to do after a failed attempt
#[derive(Debug, PartialEq)]
enum RetryDecision {
    Retry { notice: String },
    Fail(PipelineError),
}

/// Decide whether attempt `attempt` (zero-based) may be retried.
///
/// Caller cancellation is never retried; server errors, timeouts, and
/// transport failures are while attempts remain.
fn classify_failure(err: AttemptError, attempt: u32, max_retries: u32) -> RetryDecision {
    let retries_left = attempt < max_retries;
    let next = attempt + 2;
    let total = max_retries + 1;

    match err {
        AttemptError::Status { status, body } => {
            if status.is_server_error() && retries_left {
                RetryDecision::Retry {
                    notice: format!("service error {}, retry {}/{}", status.as_u16(), next, total),
                }
            } else {
                RetryDecision::Fail(PipelineError::step(
                    STEP,
                    format!("Transcription service returned HTTP {}: {}", status.as_u16(), body.trim()),
                ))
            }
        }
        AttemptError::Interrupted(reason) => {
            if !reason.is_timeout() {
                RetryDecision::Fail(PipelineError::cancelled(reason.message()))
            } else if retries_left {
                RetryDecision::Retry {
                    notice: format!("{}, retry {}/{}", reason.message(), next, total),
                }
            } else {
                RetryDecision::Fail(PipelineError::step(STEP, reason.message()))
            }
        }
        AttemptError::Transport(e) => {
            if retries_left {
                RetryDecision::Retry {
                    notice: format!("network error: {}, retry {}/{}", e, next, total),
                }
            } else {
                RetryDecision::Fail(PipelineError::step_with_cause(
                    STEP,
                    format!("Transcription request failed: {}", e),
                    &e,
                ))
            }
        }
    }
}

/// Speech-to-text for the extracted audio track
#[async_trait]
pub trait SpeechTranscriber: Send + Sync {
    /// Transcribe MP3 audio, emitting transcript partials through `reporter`
    async fn transcribe(
        &self,
        audio: &[u8],
        signal: &CancelSignal,
        reporter: &mut Reporter,
    ) -> Result<String, PipelineError>;
}

/// Streaming speech recognition over an audio-capable chat completions API
pub struct TranscriptionClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    prompt: String,
    attempt_timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl TranscriptionClient {
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build transcription HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            prompt: config.prompt.clone(),
            attempt_timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    fn request_body(&self, audio: &[u8]) -> Value {
        let encoded = STANDARD.encode(audio);

        json!({
            "model": self.model,
            "stream": true,
            "modalities": ["text"],
            "messages": [
                {
                    "role": "user",
                    "content": [
                        {
                            "type": "input_audio",
                            "input_audio": {
                                "data": format!("data:audio/{};base64,{}", TRANSCRIPTION_AUDIO.format, encoded),
                                "format": TRANSCRIPTION_AUDIO.format,
                            }
                        },
                        { "type": "text", "text": self.prompt }
                    ]
                }
            ]
        })
    }

    async fn backoff(&self, attempt: u32, signal: &CancelSignal) -> Result<(), PipelineError> {
        let pause = self.retry_backoff * (attempt + 1);
        if pause.is_zero() {
            return Ok(());
        }

        tokio::select! {
            biased;

            _ = signal.cancelled() => signal.checkpoint(),
            _ = tokio::time::sleep(pause) => Ok(()),
        }
    }

    async fn attempt(
        &self,
        body: &Value,
        api_key: &str,
        attempt_signal: &CancelSignal,
        reporter: &Reporter,
        transcript: &mut String,
    ) -> Result<(), AttemptError> {
        tracing::debug!("Posting audio to {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AttemptError::Transport(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Status { status, body });
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = stream.next().await {
            if let Some(reason) = attempt_signal.reason() {
                return Err(AttemptError::Interrupted(reason));
            }

            let chunk = chunk.map_err(|e| AttemptError::Transport(e.into()))?;
            if apply_frames(decoder.push(&chunk), reporter, transcript) {
                return Ok(());
            }
        }

        apply_frames(decoder.finish(), reporter, transcript);
        Ok(())
    }
}

#[async_trait]
impl SpeechTranscriber for TranscriptionClient {
    /// Transcribe MP3 audio, streaming each text delta as a partial event.
    ///
    /// Retries server errors, per-attempt timeouts, and transport failures
    /// up to `max_retries` times. Cancellation of `signal` ends the call
    /// immediately.
    async fn transcribe(
        &self,
        audio: &[u8],
        signal: &CancelSignal,
        reporter: &mut Reporter,
    ) -> Result<String, PipelineError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| PipelineError::step(STEP, "Transcription API key is not configured"))?;

        let body = self.request_body(audio);
        let timeout_message = format!(
            "transcription timed out after {}",
            crate::utils::format_duration(self.attempt_timeout.as_secs_f64())
        );
        let mut transcript = String::new();

        for attempt in 0..=self.max_retries {
            signal.checkpoint()?;

            if !transcript.is_empty() {
                // Deltas from the failed attempt were already streamed.
                transcript.clear();
                reporter.partial(PartialKey::Transcript, "", false);
            }

            let (attempt_signal, guard) =
                cancel::compose(Some(self.attempt_timeout), &timeout_message, Some(signal));

            let outcome = tokio::select! {
                biased;

                _ = attempt_signal.cancelled() => Err(AttemptError::Interrupted(
                    attempt_signal
                        .reason()
                        .unwrap_or_else(|| CancelReason::Aborted("cancelled".to_string())),
                )),
                result = self.attempt(&body, api_key, &attempt_signal, reporter, &mut transcript) => result,
            };
            guard.cleanup();

            let err = match outcome {
                Ok(()) => break,
                Err(err) => err,
            };

            match classify_failure(err, attempt, self.max_retries) {
                RetryDecision::Retry { notice } => {
                    tracing::warn!("Transcription attempt {} failed: {}", attempt + 1, notice);
                    reporter.active(STEP, Some(&notice));
                    self.backoff(attempt, signal).await?;
                }
                RetryDecision::Fail(err) => return Err(err),
            }
        }

        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            return Err(PipelineError::step(STEP, "No transcript returned"));
        }

        Ok(transcript)
    }
}

/// Returns `true` once the termination sentinel is seen
fn apply_frames(frames: Vec<SseFrame>, reporter: &Reporter, transcript: &mut String) -> bool {
    for frame in frames {
        match frame {
            SseFrame::Delta(text) => {
                transcript.push_str(&text);
                reporter.partial(PartialKey::Transcript, text, true);
            }
            SseFrame::Done => return true,
        }
    }
    false
}
