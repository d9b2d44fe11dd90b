//! Stub collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use clipscribe::cancel::CancelSignal;
use clipscribe::config::{DownloadConfig, OutputConfig};
use clipscribe::extractors::ShareLinkExtractor;
use clipscribe::media::{AudioSpec, MediaHeader, MediaToolkit, ProgressCallback};
use clipscribe::optimize::TranscriptOptimizer;
use clipscribe::pipeline::{PartialKey, Pipeline, PipelineError, PipelineEvent, PipelineParts, Reporter};
use clipscribe::provider::{AssetDetail, Author, MetadataProvider, UrlList, VideoMeta};
use clipscribe::transcribe::SpeechTranscriber;

pub const SHARE_TEXT: &str =
    "Check this out! https://www.douyin.com/video/7000000000000000001 copy and open";
pub const VIDEO_ID: &str = "7000000000000000001";
pub const PLAY_URL: &str = "https://v3-web.douyinvod.com/video/tos/play/?id=1";

pub struct StubProvider;

#[async_trait]
impl MetadataProvider for StubProvider {
    async fn fetch_detail(&self, external_id: &str) -> anyhow::Result<Option<AssetDetail>> {
        assert_eq!(external_id, VIDEO_ID);
        Ok(Some(AssetDetail {
            aweme_id: external_id.to_string(),
            desc: "Demo".to_string(),
            author: Author {
                nickname: "Tester".to_string(),
            },
            duration: 12_500,
            video: VideoMeta {
                play_addr: Some(UrlList::new([PLAY_URL.replace("/play/", "/playwm/")])),
                ..VideoMeta::default()
            },
            ..AssetDetail::default()
        }))
    }
}

/// Serves a 1000 byte "video" in ten chunks
#[derive(Default)]
pub struct StubToolkit {
    /// Fired after the third chunk when set
    pub cancel_mid_download: Option<CancelSignal>,
    pub extract_calls: AtomicUsize,
}

#[async_trait]
impl MediaToolkit for StubToolkit {
    async fn probe(&self, url: &str) -> anyhow::Result<MediaHeader> {
        assert_eq!(url, PLAY_URL);
        Ok(MediaHeader {
            final_url: url.to_string(),
            content_length: Some(1000),
            content_type: Some("video/mp4".to_string()),
        })
    }

    async fn download(
        &self,
        _url: &str,
        header: &MediaHeader,
        on_progress: ProgressCallback<'_>,
        _signal: &CancelSignal,
    ) -> anyhow::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        for chunk in 0..10u64 {
            buffer.extend_from_slice(&[0u8; 100]);
            on_progress(buffer.len() as u64, header.content_length)?;
            if chunk == 2 {
                if let Some(signal) = &self.cancel_mid_download {
                    signal.abort();
                }
            }
            tokio::task::yield_now().await;
        }
        Ok(buffer)
    }

    async fn extract_audio(&self, media: &[u8], spec: &AudioSpec) -> anyhow::Result<Vec<u8>> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(media.len(), 1000);
        assert_eq!((spec.format, spec.sample_rate, spec.channels, spec.bitrate), ("mp3", 16_000, 1, "128k"));
        Ok(vec![7u8; 64])
    }
}

/// Streams "hello world" in two deltas
pub struct StubTranscriber;

#[async_trait]
impl SpeechTranscriber for StubTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        signal: &CancelSignal,
        reporter: &mut Reporter,
    ) -> Result<String, PipelineError> {
        assert_eq!(audio.len(), 64);
        let mut transcript = String::new();
        for delta in ["hello", " world"] {
            signal.checkpoint()?;
            transcript.push_str(delta);
            reporter.partial(PartialKey::Transcript, delta, true);
        }
        Ok(transcript)
    }
}

pub fn parts() -> PipelineParts {
    PipelineParts {
        extractor: ShareLinkExtractor::new(&DownloadConfig::default()).expect("http client"),
        provider: Box::new(StubProvider),
        media: Box::new(StubToolkit::default()),
        transcriber: Box::new(StubTranscriber),
        optimizer: TranscriptOptimizer::default(),
        output: OutputConfig {
            chunk_size: 160,
            chunk_delay_ms: 0,
        },
    }
}

pub fn pipeline_with(toolkit: StubToolkit) -> Pipeline {
    Pipeline::new(PipelineParts {
        media: Box::new(toolkit),
        ..parts()
    })
}

pub fn pipeline() -> Arc<Pipeline> {
    Arc::new(pipeline_with(StubToolkit::default()))
}

pub async fn collect(mut events: UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut all = Vec::new();
    while let Some(event) = events.recv().await {
        all.push(event);
    }
    all
}
