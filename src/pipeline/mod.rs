//! Pipeline orchestration: runs the seven steps in order and turns every
//! outcome into events on one stream.

use anyhow::Result;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::config::{Config, OutputConfig};
use crate::extractors::ShareLinkExtractor;
use crate::media::{FfmpegToolkit, MediaToolkit};
use crate::optimize::TranscriptOptimizer;
use crate::provider::{HttpMetadataProvider, MetadataProvider, VideoInfo};
use crate::transcribe::{SpeechTranscriber, TranscriptionClient};
use crate::utils::format_file_size;

pub mod error;
pub mod events;
pub mod stages;
pub mod steps;
pub mod timer;

pub use error::PipelineError;
pub use events::{PartialKey, PipelineEvent, ProgressEvent, Reporter};
pub use steps::{PipelineStep, StepStatus};

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub markdown: String,
    pub video_info: VideoInfo,
    pub transcript: String,
}

/// Collaborators a pipeline is assembled from
pub struct PipelineParts {
    pub extractor: ShareLinkExtractor,
    pub provider: Box<dyn MetadataProvider>,
    pub media: Box<dyn MediaToolkit>,
    pub transcriber: Box<dyn SpeechTranscriber>,
    pub optimizer: TranscriptOptimizer,
    pub output: OutputConfig,
}

/// Share link in, markdown report out.
///
/// Holds no per-run state, so one instance can serve any number of
/// concurrent runs.
pub struct Pipeline {
    extractor: ShareLinkExtractor,
    provider: Box<dyn MetadataProvider>,
    media: Box<dyn MediaToolkit>,
    transcriber: Box<dyn SpeechTranscriber>,
    optimizer: TranscriptOptimizer,
    output: OutputConfig,
}

/// Per-run bookkeeping
struct Run<'a> {
    signal: &'a CancelSignal,
    reporter: Reporter,
    current: PipelineStep,
    /// Set while `current` is active and not yet completed
    in_flight: bool,
}

impl Run<'_> {
    fn enter(&mut self, step: PipelineStep) -> Result<(), PipelineError> {
        self.signal.checkpoint()?;
        self.current = step;
        self.in_flight = true;
        tracing::debug!(step = step.as_str(), "Step started");
        self.reporter.active(step, None);
        Ok(())
    }

    fn complete(&mut self, step: PipelineStep, detail: &str) {
        tracing::info!(step = step.as_str(), "{}: {}", step.label(), detail);
        self.in_flight = false;
        self.reporter.completed(step, Some(detail));
    }
}

impl Pipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            extractor: parts.extractor,
            provider: parts.provider,
            media: parts.media,
            transcriber: parts.transcriber,
            optimizer: parts.optimizer,
            output: parts.output,
        }
    }

    /// Wire up the HTTP and ffmpeg backed collaborators
    pub fn from_config(config: &Config) -> Result<Self> {
        let optimizer = TranscriptOptimizer::from_config(&config.optimization)?;
        if !optimizer.has_corrector() {
            tracing::info!("Transcript correction not configured, cleanup only");
        }

        Ok(Self::new(PipelineParts {
            extractor: ShareLinkExtractor::new(&config.download)?,
            provider: Box::new(HttpMetadataProvider::new(&config.provider)?),
            media: Box::new(FfmpegToolkit::new(&config.download)?),
            transcriber: Box::new(TranscriptionClient::new(&config.transcription)?),
            optimizer,
            output: config.output.clone(),
        }))
    }

    /// Run all steps for `share_text`, sending every event to `events`.
    ///
    /// The returned value mirrors the terminal event: `Ok` after `done`,
    /// `Err` after `error`. Exactly one terminal event is sent.
    pub async fn run(
        &self,
        share_text: &str,
        signal: Option<CancelSignal>,
        events: UnboundedSender<PipelineEvent>,
    ) -> Result<PipelineResult, PipelineError> {
        let signal = signal.unwrap_or_default();
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id);

        let mut run = Run {
            signal: &signal,
            reporter: Reporter::new(events),
            current: PipelineStep::ParseLink,
            in_flight: false,
        };

        let outcome = AssertUnwindSafe(self.execute(share_text, &mut run))
            .catch_unwind()
            .instrument(span.clone())
            .await
            .unwrap_or_else(|panic| {
                Err(PipelineError::unknown(anyhow::anyhow!(
                    "step panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        let outcome = match outcome {
            Err(err) if signal.is_cancelled() && !err.is_cancelled() => {
                tracing::debug!(parent: &span, "Discarding error after cancellation: {}", err);
                Err(signal.cancellation_error())
            }
            other => other,
        };

        match &outcome {
            Ok(result) => {
                tracing::info!(parent: &span, "Run finished: {}", result.video_info.title);
                run.reporter.emit(PipelineEvent::Done {
                    markdown: result.markdown.clone(),
                    video_info: result.video_info.clone(),
                    transcript: result.transcript.clone(),
                });
            }
            Err(err) => {
                if err.is_cancelled() {
                    tracing::warn!(parent: &span, "Run cancelled during {}: {}", run.current, err);
                } else {
                    tracing::error!(parent: &span, "Run failed during {}: {}", run.current, err);
                }
                let detail = match err {
                    PipelineError::Cancelled { .. } => "cancelled".to_string(),
                    PipelineError::Step { message, .. } => message.clone(),
                };
                // A failure between steps has no active step to close.
                if run.in_flight {
                    run.reporter.failed(run.current, Some(&detail));
                }
                run.reporter.emit(PipelineEvent::from_error(err));
            }
        }

        outcome
    }

    /// Run on a background task.
    ///
    /// The receiver yields every event; the handle resolves to the same
    /// outcome `run` returns.
    pub fn spawn(
        self: Arc<Self>,
        share_text: impl Into<String>,
        signal: Option<CancelSignal>,
    ) -> (
        UnboundedReceiver<PipelineEvent>,
        JoinHandle<Result<PipelineResult, PipelineError>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let share_text = share_text.into();
        let handle = tokio::spawn(async move { self.run(&share_text, signal, tx).await });
        (rx, handle)
    }

    async fn execute(
        &self,
        share_text: &str,
        run: &mut Run<'_>,
    ) -> Result<PipelineResult, PipelineError> {
        let signal = run.signal;

        run.enter(PipelineStep::ParseLink)?;
        let link = stages::parse_link(&self.extractor, share_text, signal).await?;
        run.complete(PipelineStep::ParseLink, &format!("video {}", link.external_id));

        run.enter(PipelineStep::FetchDetail)?;
        let detail = stages::fetch_detail(self.provider.as_ref(), &link.external_id, signal).await?;
        stages::announce(&run.reporter, &detail.video_info);
        run.complete(PipelineStep::FetchDetail, &detail.video_info.title);

        run.enter(PipelineStep::DownloadVideo)?;
        let video = stages::download_media(
            self.media.as_ref(),
            &detail.playable_url,
            signal,
            &mut run.reporter,
        )
        .await?;
        run.complete(PipelineStep::DownloadVideo, &format_file_size(video.len() as u64));

        run.enter(PipelineStep::ExtractAudio)?;
        let audio = stages::extract_audio(self.media.as_ref(), video, signal).await?;
        run.complete(PipelineStep::ExtractAudio, &format_file_size(audio.len() as u64));

        run.enter(PipelineStep::TranscribeAudio)?;
        let transcript =
            stages::transcribe_audio(self.transcriber.as_ref(), &audio, signal, &mut run.reporter)
                .await?;
        drop(audio);
        run.complete(
            PipelineStep::TranscribeAudio,
            &format!("{} characters", transcript.chars().count()),
        );

        run.enter(PipelineStep::Optimize)?;
        let optimized =
            stages::optimize_transcript(&self.optimizer, &transcript, &detail, signal).await?;
        let mode = if optimized.corrected {
            "corrected"
        } else {
            "cleaned"
        };
        run.complete(PipelineStep::Optimize, mode);
        let transcript = optimized.text;

        run.enter(PipelineStep::Summarize)?;
        let markdown =
            stages::summarize(&detail.video_info, &transcript, &self.output, signal, &run.reporter)
                .await?;
        run.complete(PipelineStep::Summarize, "report ready");

        Ok(PipelineResult {
            markdown,
            video_info: detail.video_info,
            transcript,
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownloadConfig;
    use crate::media::{AudioSpec, MediaHeader, ProgressCallback};
    use crate::provider::{AssetDetail, MockMetadataProvider, UrlList, VideoMeta};
    use async_trait::async_trait;

    const SHARE_TEXT: &str = "https://www.douyin.com/video/7000000000000000001";

    struct PanickingToolkit;

    #[async_trait]
    impl MediaToolkit for PanickingToolkit {
        async fn probe(&self, url: &str) -> anyhow::Result<MediaHeader> {
            Ok(MediaHeader {
                final_url: url.to_string(),
                ..MediaHeader::default()
            })
        }

        async fn download(
            &self,
            _url: &str,
            _header: &MediaHeader,
            _on_progress: ProgressCallback<'_>,
            _signal: &CancelSignal,
        ) -> anyhow::Result<Vec<u8>> {
            Ok(vec![1, 2, 3])
        }

        async fn extract_audio(&self, _media: &[u8], _spec: &AudioSpec) -> anyhow::Result<Vec<u8>> {
            panic!("decoder crashed")
        }
    }

    struct UnreachableTranscriber;

    #[async_trait]
    impl SpeechTranscriber for UnreachableTranscriber {
        async fn transcribe(
            &self,
            _audio: &[u8],
            _signal: &CancelSignal,
            _reporter: &mut Reporter,
        ) -> Result<String, PipelineError> {
            unreachable!("transcription must not start")
        }
    }

    fn provider() -> MockMetadataProvider {
        let mut provider = MockMetadataProvider::new();
        provider.expect_fetch_detail().returning(|_| {
            Ok(Some(AssetDetail {
                desc: "Demo".to_string(),
                duration: 12_500,
                video: VideoMeta {
                    play_addr: Some(UrlList::new(["https://v.example.com/play/?id=1"])),
                    ..VideoMeta::default()
                },
                ..AssetDetail::default()
            }))
        });
        provider
    }

    fn pipeline(provider: MockMetadataProvider) -> Pipeline {
        Pipeline::new(PipelineParts {
            extractor: ShareLinkExtractor::new(&DownloadConfig::default()).unwrap(),
            provider: Box::new(provider),
            media: Box::new(PanickingToolkit),
            transcriber: Box::new(UnreachableTranscriber),
            optimizer: TranscriptOptimizer::default(),
            output: OutputConfig::default(),
        })
    }

    fn collect(mut rx: UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn test_panic_becomes_unknown_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        let err = pipeline(provider()).run(SHARE_TEXT, None, tx).await.unwrap_err();

        assert_eq!(err.failed_step(), Some(PipelineStep::ParseLink));
        assert!(err.cause().unwrap_or_default().contains("decoder crashed"));

        let events = collect(rx);
        let terminal: Vec<&PipelineEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert!(matches!(terminal[0], PipelineEvent::Error { .. }));

        // The failed progress event belongs to the step that was running.
        let failed = events.iter().find_map(|event| match event {
            PipelineEvent::Progress(p) if p.status == StepStatus::Error => Some(p.step),
            _ => None,
        });
        assert_eq!(failed, Some(PipelineStep::ExtractAudio));
    }

    #[tokio::test]
    async fn test_step_failure_is_attributed() {
        let mut provider = MockMetadataProvider::new();
        provider
            .expect_fetch_detail()
            .returning(|_| Err(anyhow::anyhow!("quota exceeded")));

        let (tx, rx) = mpsc::unbounded_channel();
        let err = pipeline(provider).run(SHARE_TEXT, None, tx).await.unwrap_err();
        assert_eq!(err.failed_step(), Some(PipelineStep::FetchDetail));

        let events = collect(rx);
        assert!(!events.iter().any(|e| matches!(e, PipelineEvent::Info { .. })));
        match events.last() {
            Some(PipelineEvent::Error { step, cause, .. }) => {
                assert_eq!(*step, Some(PipelineStep::FetchDetail));
                assert_eq!(cause.as_deref(), Some("quota exceeded"));
            }
            other => panic!("unexpected last event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_does_nothing() {
        let mut provider = MockMetadataProvider::new();
        provider.expect_fetch_detail().never();

        let signal = CancelSignal::new();
        signal.abort();

        let (tx, rx) = mpsc::unbounded_channel();
        let err = pipeline(provider).run(SHARE_TEXT, Some(signal), tx).await.unwrap_err();
        assert!(err.is_cancelled());

        let events = collect(rx);
        assert!(!events
            .iter()
            .any(|e| matches!(e, PipelineEvent::Progress(p) if p.status == StepStatus::Active)));
        assert!(matches!(events.last(), Some(PipelineEvent::Error { step: None, .. })));
    }

    #[tokio::test]
    async fn test_invalid_share_text_fails_first_step() {
        let (tx, rx) = mpsc::unbounded_channel();
        let err = pipeline(provider()).run("   ", None, tx).await.unwrap_err();
        assert_eq!(err.failed_step(), Some(PipelineStep::ParseLink));
        assert_eq!(collect(rx).iter().filter(|e| e.is_terminal()).count(), 1);
    }
}
