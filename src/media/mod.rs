use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header, Client};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::cancel::CancelSignal;
use crate::config::DownloadConfig;
use crate::pipeline::PipelineError;

/// What a HEAD request tells us about a media URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaHeader {
    pub final_url: String,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
}

/// Target encoding for audio handed to speech recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub format: &'static str,
    pub sample_rate: u32,
    pub channels: u8,
    pub bitrate: &'static str,
}

/// Mono 16kHz 128kbps MP3
pub const TRANSCRIPTION_AUDIO: AudioSpec = AudioSpec {
    format: "mp3",
    sample_rate: 16_000,
    channels: 1,
    bitrate: "128k",
};

/// Upper bound on the buffer reserved up front from an advertised length
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Invoked with `(bytes_so_far, total_bytes)` after every received chunk.
/// Returning an error aborts the download with that error.
pub type ProgressCallback<'a> = &'a mut (dyn FnMut(u64, Option<u64>) -> Result<()> + Send);

/// Media download and transcoding backend
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    async fn probe(&self, url: &str) -> Result<MediaHeader>;

    async fn download(
        &self,
        url: &str,
        header: &MediaHeader,
        on_progress: ProgressCallback<'_>,
        signal: &CancelSignal,
    ) -> Result<Vec<u8>>;

    async fn extract_audio(&self, media: &[u8], spec: &AudioSpec) -> Result<Vec<u8>>;
}

/// reqwest for transfers, ffmpeg for transcoding
pub struct FfmpegToolkit {
    client: Client,
    ffmpeg_path: String,
}

impl FfmpegToolkit {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        if let Some(referer) = &config.referer {
            headers.insert(
                header::REFERER,
                header::HeaderValue::from_str(referer).context("Invalid referer header")?,
            );
        }

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build download HTTP client")?;

        Ok(Self {
            client,
            ffmpeg_path: config.ffmpeg_path.clone(),
        })
    }

    fn ffmpeg_args(input: &str, output: &str, spec: &AudioSpec) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string(),
            "-vn".to_string(), // No video
            "-ac".to_string(),
            spec.channels.to_string(),
            "-ar".to_string(),
            spec.sample_rate.to_string(),
            "-b:a".to_string(),
            spec.bitrate.to_string(),
            "-f".to_string(),
            spec.format.to_string(),
            "-y".to_string(),
            output.to_string(),
        ]
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, url: &str) -> Result<MediaHeader> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .context("HEAD request failed")?;

        // Some CDNs refuse HEAD; the GET may still succeed, so only the size is lost.
        if !response.status().is_success() {
            tracing::warn!("HEAD {} returned HTTP {}, size unknown", url, response.status());
            return Ok(MediaHeader {
                final_url: url.to_string(),
                ..MediaHeader::default()
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .map(|s| s.to_string());

        let content_length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|cl| cl.to_str().ok())
            .and_then(|cl| cl.parse::<u64>().ok());

        Ok(MediaHeader {
            final_url: response.url().to_string(),
            content_length,
            content_type,
        })
    }

    async fn download(
        &self,
        url: &str,
        header: &MediaHeader,
        on_progress: ProgressCallback<'_>,
        signal: &CancelSignal,
    ) -> Result<Vec<u8>> {
        let target = if header.final_url.is_empty() {
            url
        } else {
            header.final_url.as_str()
        };

        let response = tokio::select! {
            biased;

            _ = signal.cancelled() => return Err(signal.cancellation_error().into()),
            response = self.client.get(target).send() => response.context("Download request failed")?,
        };

        if !response.status().is_success() {
            anyhow::bail!("Failed to download video: HTTP {}", response.status());
        }

        let total = response.content_length().or(header.content_length);
        let reserve = total.map_or(0, |total| total.min(MAX_PREALLOCATION));
        let mut buffer = Vec::with_capacity(reserve as usize);
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                biased;

                _ = signal.cancelled() => return Err(signal.cancellation_error().into()),
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else { break };
            let chunk = chunk.context("Download stream interrupted")?;
            buffer.extend_from_slice(&chunk);
            on_progress(buffer.len() as u64, total)?;
        }

        if buffer.is_empty() {
            anyhow::bail!("Downloaded video is empty");
        }

        Ok(buffer)
    }

    async fn extract_audio(&self, media: &[u8], spec: &AudioSpec) -> Result<Vec<u8>> {
        // ffmpeg needs a seekable input for MP4 files with a trailing moov atom.
        let work_dir = tempfile::TempDir::new().context("Failed to create temporary directory")?;
        let input_path = work_dir.path().join("input.media");
        let output_path = work_dir.path().join(format!("audio.{}", spec.format));

        tokio::fs::write(&input_path, media)
            .await
            .context("Failed to stage media for ffmpeg")?;

        let args = Self::ffmpeg_args(
            &input_path.to_string_lossy(),
            &output_path.to_string_lossy(),
            spec,
        );
        tracing::debug!("Running {} {}", self.ffmpeg_path, args.join(" "));

        let output = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to launch {}", self.ffmpeg_path))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("ffmpeg failed to extract audio: {}", error.trim());
        }

        let audio = tokio::fs::read(&output_path)
            .await
            .context("ffmpeg produced no audio output")?;

        if audio.is_empty() {
            anyhow::bail!("ffmpeg produced an empty audio track");
        }

        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toolkit() -> FfmpegToolkit {
        FfmpegToolkit::new(&DownloadConfig::default()).unwrap()
    }

    #[test]
    fn test_ffmpeg_args_carry_audio_spec() {
        let args = FfmpegToolkit::ffmpeg_args("in.mp4", "out.mp3", &TRANSCRIPTION_AUDIO);
        let joined = args.join(" ");

        assert!(joined.contains("-i in.mp4 -vn"));
        assert!(joined.contains("-ac 1"));
        assert!(joined.contains("-ar 16000"));
        assert!(joined.contains("-b:a 128k"));
        assert!(joined.ends_with("-f mp3 -y out.mp3"));
    }

    #[tokio::test]
    async fn test_probe_reads_headers() {
        let mut server = mockito::Server::new_async().await;
        let _head = server
            .mock("HEAD", "/v.mp4")
            .with_status(200)
            .with_header("content-type", "video/mp4")
            .with_header("content-length", "2048")
            .create_async()
            .await;

        let header = toolkit().probe(&format!("{}/v.mp4", server.url())).await.unwrap();
        assert_eq!(header.content_type.as_deref(), Some("video/mp4"));
        assert_eq!(header.content_length, Some(2048));
    }

    #[tokio::test]
    async fn test_probe_tolerates_rejected_head() {
        let mut server = mockito::Server::new_async().await;
        let _head = server.mock("HEAD", "/v.mp4").with_status(405).create_async().await;

        let url = format!("{}/v.mp4", server.url());
        let header = toolkit().probe(&url).await.unwrap();
        assert_eq!(header.final_url, url);
        assert!(header.content_length.is_none());
    }

    #[tokio::test]
    async fn test_download_reports_progress() {
        let mut server = mockito::Server::new_async().await;
        let body = vec![7u8; 4096];
        let _get = server
            .mock("GET", "/v.mp4")
            .with_status(200)
            .with_body(body.clone())
            .create_async()
            .await;

        let url = format!("{}/v.mp4", server.url());
        let mut seen = Vec::new();
        let mut on_progress = |done: u64, total: Option<u64>| -> Result<()> {
            seen.push((done, total));
            Ok(())
        };

        let signal = CancelSignal::new();
        let bytes = toolkit()
            .download(&url, &MediaHeader::default(), &mut on_progress, &signal)
            .await
            .unwrap();

        assert_eq!(bytes, body);
        assert_eq!(seen.last(), Some(&(4096, Some(4096))));
    }

    #[tokio::test]
    async fn test_download_ignores_oversized_advertised_length() {
        use std::io::Write;

        let mut server = mockito::Server::new_async().await;
        let _get = server
            .mock("GET", "/v.mp4")
            .with_status(200)
            .with_chunked_body(|w| w.write_all(b"tiny video"))
            .create_async()
            .await;

        let url = format!("{}/v.mp4", server.url());
        let header = MediaHeader {
            final_url: url.clone(),
            content_length: Some(u64::MAX),
            content_type: None,
        };
        let mut on_progress = |_: u64, _: Option<u64>| -> Result<()> { Ok(()) };

        let bytes = toolkit()
            .download(&url, &header, &mut on_progress, &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(bytes, b"tiny video");
    }

    #[tokio::test]
    async fn test_download_stops_when_callback_fails() {
        let mut server = mockito::Server::new_async().await;
        let _get = server
            .mock("GET", "/v.mp4")
            .with_status(200)
            .with_body(vec![1u8; 1024])
            .create_async()
            .await;

        let url = format!("{}/v.mp4", server.url());
        let mut on_progress = |_: u64, _: Option<u64>| -> Result<()> {
            Err(PipelineError::cancelled("stop").into())
        };

        let err = toolkit()
            .download(&url, &MediaHeader::default(), &mut on_progress, &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<PipelineError>().is_some());
    }

    #[tokio::test]
    async fn test_download_honours_triggered_signal() {
        let signal = CancelSignal::new();
        signal.abort();

        let mut on_progress = |_: u64, _: Option<u64>| -> Result<()> { Ok(()) };
        let err = toolkit()
            .download("http://127.0.0.1:9/v.mp4", &MediaHeader::default(), &mut on_progress, &signal)
            .await
            .unwrap_err();

        let err = err.downcast::<PipelineError>().unwrap();
        assert!(err.is_cancelled());
    }
}
