use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::ProviderConfig;

/// A list of mirror URLs for the same resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UrlList {
    #[serde(default)]
    pub url_list: Vec<String>,
}

impl UrlList {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            url_list: urls.into_iter().map(Into::into).collect(),
        }
    }

    pub fn first(&self) -> Option<&str> {
        self.url_list.first().map(String::as_str)
    }
}

/// One rung of the bitrate ladder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BitrateEntry {
    /// Bits per second, when the platform reports it
    #[serde(default)]
    pub bit_rate: Option<u64>,

    #[serde(default)]
    pub gear_name: Option<String>,

    #[serde(default)]
    pub play_addr: UrlList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMeta {
    /// Duration in milliseconds
    #[serde(default)]
    pub duration: u64,

    #[serde(default)]
    pub cover: Option<UrlList>,

    /// Separate audio track, when the platform serves one
    #[serde(default)]
    pub audio_addr: Option<UrlList>,

    /// Low bitrate fallback stream
    #[serde(default)]
    pub play_addr_lowbr: Option<UrlList>,

    #[serde(default)]
    pub bit_rate: Vec<BitrateEntry>,

    #[serde(default)]
    pub play_addr: Option<UrlList>,

    #[serde(default)]
    pub download_addr: Option<UrlList>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub nickname: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextExtra {
    #[serde(default)]
    pub hashtag_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoTag {
    #[serde(default)]
    pub tag_name: String,
}

/// Raw asset metadata as returned by the metadata provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetDetail {
    #[serde(default)]
    pub aweme_id: String,

    /// Caption; doubles as the title
    #[serde(default)]
    pub desc: String,

    #[serde(default)]
    pub author: Author,

    /// Duration in milliseconds; some responses only fill `video.duration`
    #[serde(default)]
    pub duration: u64,

    #[serde(default)]
    pub video: VideoMeta,

    #[serde(default)]
    pub text_extra: Vec<TextExtra>,

    #[serde(default)]
    pub video_tag: Vec<VideoTag>,
}

impl AssetDetail {
    pub fn duration_secs(&self) -> f64 {
        let millis = if self.duration > 0 {
            self.duration
        } else {
            self.video.duration
        };
        millis as f64 / 1000.0
    }

    pub fn hashtags(&self) -> Vec<&str> {
        self.text_extra
            .iter()
            .filter_map(|extra| extra.hashtag_name.as_deref())
            .filter(|name| !name.trim().is_empty())
            .collect()
    }

    pub fn tags(&self) -> Vec<&str> {
        self.video_tag
            .iter()
            .map(|tag| tag.tag_name.as_str())
            .filter(|name| !name.trim().is_empty())
            .collect()
    }

    /// Build the read-only summary the rest of the run works with
    pub fn video_info(&self, external_id: &str) -> VideoInfo {
        let title = self.desc.trim();
        let author = self.author.nickname.trim();

        VideoInfo {
            title: if title.is_empty() {
                "Untitled video".to_string()
            } else {
                title.to_string()
            },
            author: if author.is_empty() {
                "Unknown author".to_string()
            } else {
                author.to_string()
            },
            duration: self.duration_secs(),
            external_id: external_id.to_string(),
            cover_url: self
                .video
                .cover
                .as_ref()
                .and_then(|cover| cover.first())
                .map(str::to_string),
        }
    }
}

/// Video summary shown in the report header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub title: String,
    pub author: String,
    /// Seconds
    pub duration: f64,
    pub external_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
}

/// Source of video metadata and candidate playback URLs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Look up a single asset. `Ok(None)` means the provider answered but
    /// knows no such asset.
    async fn fetch_detail(&self, external_id: &str) -> Result<Option<AssetDetail>>;
}

/// Metadata provider backed by an HTTP data API
pub struct HttpMetadataProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpMetadataProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build metadata HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Pull the detail object out of the provider's response envelope
    fn unwrap_envelope(body: Value) -> Result<Option<AssetDetail>> {
        let detail = body
            .pointer("/data/aweme_detail")
            .or_else(|| body.get("aweme_detail"))
            .cloned()
            .unwrap_or(Value::Null);

        if detail.is_null() {
            return Ok(None);
        }

        let detail: AssetDetail =
            serde_json::from_value(detail).context("Malformed asset detail in provider response")?;
        Ok(Some(detail))
    }
}

#[async_trait]
impl MetadataProvider for HttpMetadataProvider {
    async fn fetch_detail(&self, external_id: &str) -> Result<Option<AssetDetail>> {
        let url = format!("{}/detail", self.base_url);
        tracing::debug!("Requesting asset detail for {} from {}", external_id, url);

        let mut request = self.client.get(&url).query(&[("aweme_id", external_id)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("Metadata request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Metadata provider returned HTTP {}: {}", status, body);
        }

        let body: Value = response
            .json()
            .await
            .context("Metadata provider returned invalid JSON")?;

        Self::unwrap_envelope(body)
    }
}
