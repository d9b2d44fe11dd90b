//! Transcript cleanup and metadata-aware correction.
//!
//! The cleanup pass always runs. The correction call is best-effort: when it
//! is not configured or fails for any reason, the cleaned text is used.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::cancel::CancelSignal;
use crate::config::OptimizationConfig;
use crate::pipeline::PipelineError;
use crate::provider::{AssetDetail, VideoInfo};

const SYSTEM_PROMPT: &str = "You correct speech recognition transcripts of short videos. \
Fix misrecognized words, punctuation, and obvious homophone errors. \
When a name, place, brand, or term in the transcript resembles one in the video metadata, \
use the spelling from the metadata. Keep the original language, wording, and line structure. \
Do not summarize, translate, or add commentary. Output only the corrected transcript.";

/// Trim every line, drop blank lines, rejoin with single newlines
pub fn clean_transcript(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Metadata handed to the corrector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionContext {
    pub title: String,
    pub author: String,
    pub hashtags: Vec<String>,
    pub tags: Vec<String>,
}

impl CorrectionContext {
    pub fn new(info: &VideoInfo, detail: &AssetDetail) -> Self {
        Self {
            title: info.title.clone(),
            author: info.author.clone(),
            hashtags: detail.hashtags().into_iter().map(str::to_string).collect(),
            tags: detail.tags().into_iter().map(str::to_string).collect(),
        }
    }

    fn render(&self) -> String {
        let list = |items: &[String]| {
            if items.is_empty() {
                "(none)".to_string()
            } else {
                items.join(", ")
            }
        };

        format!(
            "Title: {}\nAuthor: {}\nHashtags: {}\nTags: {}",
            self.title,
            self.author,
            list(&self.hashtags),
            list(&self.tags)
        )
    }
}

/// Language-model transcript correction
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptCorrector: Send + Sync {
    async fn correct(&self, transcript: &str, context: &CorrectionContext) -> Result<String>;
}

/// Corrector backed by an OpenAI-compatible chat completions endpoint
pub struct ChatCorrector {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatCorrector {
    /// `None` unless both an API key and a model are configured
    pub fn from_config(config: &OptimizationConfig) -> Result<Option<Self>> {
        let Some((api_key, model)) = config.credentials() else {
            return Ok(None);
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build optimization HTTP client")?;

        Ok(Some(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }))
    }

    fn request_body(&self, transcript: &str, context: &CorrectionContext) -> Value {
        json!({
            "model": self.model,
            "stream": false,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": format!(
                        "Video metadata:\n{}\n\nTranscript:\n{}",
                        context.render(),
                        transcript
                    )
                }
            ]
        })
    }
}

#[async_trait]
impl TranscriptCorrector for ChatCorrector {
    async fn correct(&self, transcript: &str, context: &CorrectionContext) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(transcript, context))
            .send()
            .await
            .context("Correction request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Correction service returned HTTP {}: {}", status, body.trim());
        }

        let body: Value = response
            .json()
            .await
            .context("Correction service returned invalid JSON")?;

        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Correction response has no message content"))
    }
}

/// Optimized text and whether the corrector produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizedTranscript {
    pub text: String,
    pub corrected: bool,
}

impl OptimizedTranscript {
    fn cleaned(text: String) -> Self {
        Self {
            text,
            corrected: false,
        }
    }
}

/// Cleanup plus optional correction
#[derive(Default)]
pub struct TranscriptOptimizer {
    corrector: Option<Box<dyn TranscriptCorrector>>,
}

impl TranscriptOptimizer {
    pub fn new(corrector: Option<Box<dyn TranscriptCorrector>>) -> Self {
        Self { corrector }
    }

    pub fn from_config(config: &OptimizationConfig) -> Result<Self> {
        let corrector = ChatCorrector::from_config(config)?
            .map(|corrector| Box::new(corrector) as Box<dyn TranscriptCorrector>);
        Ok(Self::new(corrector))
    }

    pub fn has_corrector(&self) -> bool {
        self.corrector.is_some()
    }

    /// Clean and, when possible, correct `transcript`.
    ///
    /// Only cancellation is reported as an error; correction failures fall
    /// back to the cleaned text.
    pub async fn optimize(
        &self,
        transcript: &str,
        info: &VideoInfo,
        detail: &AssetDetail,
        signal: &CancelSignal,
    ) -> Result<OptimizedTranscript, PipelineError> {
        let cleaned = clean_transcript(transcript);

        let Some(corrector) = &self.corrector else {
            return Ok(OptimizedTranscript::cleaned(cleaned));
        };
        if cleaned.is_empty() {
            return Ok(OptimizedTranscript::cleaned(cleaned));
        }

        let context = CorrectionContext::new(info, detail);
        let corrected = tokio::select! {
            biased;

            _ = signal.cancelled() => None,
            corrected = corrector.correct(&cleaned, &context) => Some(corrected),
        };
        let Some(corrected) = corrected else {
            signal.checkpoint()?;
            return Ok(OptimizedTranscript::cleaned(cleaned));
        };

        match corrected.map(|text| clean_transcript(&text)) {
            Ok(text) if !text.is_empty() => Ok(OptimizedTranscript {
                text,
                corrected: true,
            }),
            Ok(_) => {
                tracing::warn!("Correction returned empty text, keeping cleaned transcript");
                Ok(OptimizedTranscript::cleaned(cleaned))
            }
            Err(e) => {
                tracing::warn!("Transcript correction failed, keeping cleaned transcript: {:#}", e);
                Ok(OptimizedTranscript::cleaned(cleaned))
            }
        }
    }
}
