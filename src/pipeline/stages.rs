//! The seven units of work, each a function of the previous stage's output
//! and the shared cancellation signal.
//!
//! Stages may add `active` details of their own; the orchestrator owns
//! checkpoints and step transitions.

use std::future::Future;

use super::error::PipelineError;
use super::events::{PipelineEvent, Reporter};
use super::steps::PipelineStep;
use crate::cancel::CancelSignal;
use crate::config::OutputConfig;
use crate::extractors::{ShareLink, ShareLinkExtractor};
use crate::media::{MediaToolkit, TRANSCRIPTION_AUDIO};
use crate::optimize::{OptimizedTranscript, TranscriptOptimizer};
use crate::output;
use crate::provider::{AssetDetail, MetadataProvider, VideoInfo};
use crate::resolver;
use crate::transcribe::SpeechTranscriber;
use crate::utils::format_file_size;

/// Output of Fetch-Detail
#[derive(Debug, Clone)]
pub struct DetailOutput {
    pub video_info: VideoInfo,
    pub playable_url: String,
    pub detail: AssetDetail,
}

/// Race `future` against the signal
async fn until_cancelled<F, T>(signal: &CancelSignal, future: F) -> Result<T, PipelineError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;

        _ = signal.cancelled() => Err(signal.cancellation_error()),
        value = future => Ok(value),
    }
}

pub async fn parse_link(
    extractor: &ShareLinkExtractor,
    share_text: &str,
    signal: &CancelSignal,
) -> Result<ShareLink, PipelineError> {
    until_cancelled(signal, extractor.resolve(share_text))
        .await?
        .map_err(|e| PipelineError::from_anyhow(PipelineStep::ParseLink, "Could not parse share link", e))
}

pub async fn fetch_detail(
    provider: &dyn MetadataProvider,
    external_id: &str,
    signal: &CancelSignal,
) -> Result<DetailOutput, PipelineError> {
    const STEP: PipelineStep = PipelineStep::FetchDetail;

    let detail = until_cancelled(signal, provider.fetch_detail(external_id))
        .await?
        .map_err(|e| PipelineError::from_anyhow(STEP, "Failed to fetch video details", e))?
        .ok_or_else(|| PipelineError::step(STEP, format!("No details returned for video {}", external_id)))?;

    let playable_url = resolver::resolve(&detail)
        .ok_or_else(|| PipelineError::step(STEP, "No playable URL found in video details"))?;

    tracing::debug!("Resolved playable URL: {}", playable_url);

    Ok(DetailOutput {
        video_info: detail.video_info(external_id),
        playable_url,
        detail,
    })
}

/// Turns byte counts into progress notices that only ever move forward
#[derive(Debug, Default)]
pub(crate) struct DownloadProgress {
    last_percent: Option<u8>,
    last_mib: u64,
}

const MIB: u64 = 1024 * 1024;

impl DownloadProgress {
    /// The new percent when a whole-percent boundary was crossed.
    ///
    /// Capped at 99; completion is reported by the step itself.
    pub(crate) fn observe(&mut self, downloaded: u64, total: Option<u64>) -> Option<u8> {
        let total = total.filter(|t| *t > 0)?;
        let percent = ((downloaded.saturating_mul(100)) / total).min(99) as u8;

        if self.last_percent.map_or(true, |last| percent > last) {
            self.last_percent = Some(percent);
            Some(percent)
        } else {
            None
        }
    }

    /// Without a known size, report each new whole MiB instead
    pub(crate) fn observe_bytes(&mut self, downloaded: u64) -> Option<u64> {
        let mib = downloaded / MIB;
        if mib > self.last_mib {
            self.last_mib = mib;
            Some(mib)
        } else {
            None
        }
    }

    fn detail(&mut self, downloaded: u64, total: Option<u64>) -> Option<String> {
        match total.filter(|t| *t > 0) {
            Some(_) => self
                .observe(downloaded, total)
                .map(|percent| format!("downloaded {}%", percent)),
            None => self
                .observe_bytes(downloaded)
                .map(|mib| format!("downloaded {}", format_file_size(mib * MIB))),
        }
    }
}

pub async fn download_media(
    media: &dyn MediaToolkit,
    playable_url: &str,
    signal: &CancelSignal,
    reporter: &mut Reporter,
) -> Result<Vec<u8>, PipelineError> {
    const STEP: PipelineStep = PipelineStep::DownloadVideo;

    let header = until_cancelled(signal, media.probe(playable_url))
        .await?
        .map_err(|e| PipelineError::from_anyhow(STEP, "Failed to probe media", e))?;

    if let Some(size) = header.content_length {
        reporter.active(STEP, Some(&format!("size {}", format_file_size(size))));
    }

    let mut progress = DownloadProgress::default();
    let mut on_progress = |downloaded: u64, total: Option<u64>| -> anyhow::Result<()> {
        signal.checkpoint()?;
        if let Some(detail) = progress.detail(downloaded, total) {
            reporter.active(STEP, Some(&detail));
        }
        Ok(())
    };

    let buffer = media
        .download(&header.final_url, &header, &mut on_progress, signal)
        .await
        .map_err(|e| PipelineError::from_anyhow(STEP, "Failed to download video", e))?;

    // Discard the buffer if the signal fired during the transfer.
    signal.checkpoint()?;
    Ok(buffer)
}

pub async fn extract_audio(
    media: &dyn MediaToolkit,
    video: Vec<u8>,
    signal: &CancelSignal,
) -> Result<Vec<u8>, PipelineError> {
    let audio = until_cancelled(signal, media.extract_audio(&video, &TRANSCRIPTION_AUDIO))
        .await?
        .map_err(|e| {
            PipelineError::from_anyhow(PipelineStep::ExtractAudio, "Failed to extract audio", e)
        })?;

    if audio.is_empty() {
        return Err(PipelineError::step(PipelineStep::ExtractAudio, "Audio extraction produced no data"));
    }
    Ok(audio)
}

pub async fn transcribe_audio(
    transcriber: &dyn SpeechTranscriber,
    audio: &[u8],
    signal: &CancelSignal,
    reporter: &mut Reporter,
) -> Result<String, PipelineError> {
    transcriber.transcribe(audio, signal, reporter).await
}

pub async fn optimize_transcript(
    optimizer: &TranscriptOptimizer,
    transcript: &str,
    detail: &DetailOutput,
    signal: &CancelSignal,
) -> Result<OptimizedTranscript, PipelineError> {
    optimizer
        .optimize(transcript, &detail.video_info, &detail.detail, signal)
        .await
}

pub async fn summarize(
    video_info: &VideoInfo,
    transcript: &str,
    config: &OutputConfig,
    signal: &CancelSignal,
    reporter: &Reporter,
) -> Result<String, PipelineError> {
    let markdown = output::render_markdown(video_info, transcript);
    output::stream_markdown(
        &markdown,
        config.chunk_size,
        std::time::Duration::from_millis(config.chunk_delay_ms),
        signal,
        reporter,
    )
    .await?;
    Ok(markdown)
}

/// Announce the metadata once it is known
pub fn announce(reporter: &Reporter, video_info: &VideoInfo) {
    reporter.emit(PipelineEvent::Info {
        video_info: video_info.clone(),
    });
}
