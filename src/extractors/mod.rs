use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::config::DownloadConfig;

/// Outcome of resolving a share link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareLink {
    /// Platform-assigned asset id
    pub external_id: String,

    /// Canonical URL the id was read from
    pub resolved_url: String,
}

/// Query parameters that carry the asset id on web and app URLs
const ID_QUERY_KEYS: &[&str] = &["modal_id", "aweme_id", "item_ids", "vid"];

/// Path segments that precede the asset id
const ID_PATH_MARKERS: &[&str] = &["video", "note", "share/video"];

const MIN_ID_LEN: usize = 15;
const MAX_ID_LEN: usize = 20;

fn is_asset_id(candidate: &str) -> bool {
    (MIN_ID_LEN..=MAX_ID_LEN).contains(&candidate.len())
        && candidate.chars().all(|c| c.is_ascii_digit())
}

/// Find the first http(s) URL inside free-form share text.
///
/// Share text usually wraps the link in a caption and trailing prose, so the
/// token is cut at the first whitespace and trailing punctuation is dropped.
pub fn find_url(text: &str) -> Option<String> {
    let start = ["https://", "http://"]
        .iter()
        .filter_map(|scheme| text.find(scheme))
        .min()?;
    let token: String = text[start..]
        .chars()
        .take_while(|c| !c.is_whitespace() && !is_cjk_punctuation(*c))
        .collect();
    let token = token.trim_end_matches(|c: char| ".,;:!?)]}'\"".contains(c));

    validate_url(token).ok().map(|url| url.to_string())
}

fn is_cjk_punctuation(c: char) -> bool {
    matches!(c, '，' | '。' | '！' | '？' | '；' | '：' | '）' | '】' | '“' | '”')
}

/// Read the asset id from a resolved URL's path or query
pub fn extract_asset_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;

    for (key, value) in parsed.query_pairs() {
        if ID_QUERY_KEYS.contains(&key.as_ref()) {
            let first = value.split(',').next().unwrap_or_default();
            if is_asset_id(first) {
                return Some(first.to_string());
            }
        }
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    for marker in ID_PATH_MARKERS {
        let marker_parts: Vec<&str> = marker.split('/').collect();
        for window_start in 0..segments.len() {
            let end = window_start + marker_parts.len();
            if end >= segments.len() {
                break;
            }
            if segments[window_start..end] == marker_parts[..] && is_asset_id(segments[end]) {
                return Some(segments[end].to_string());
            }
        }
    }

    None
}

/// Resolves share text to an asset id, following short-link redirects
pub struct ShareLinkExtractor {
    client: Client,
}

impl ShareLinkExtractor {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build share link HTTP client")?;

        Ok(Self { client })
    }

    /// Resolve share text, a share URL, or a bare asset id
    pub async fn resolve(&self, share_text: &str) -> Result<ShareLink> {
        let trimmed = share_text.trim();
        if trimmed.is_empty() {
            anyhow::bail!("Share text is empty");
        }

        if is_asset_id(trimmed) {
            return Ok(ShareLink {
                external_id: trimmed.to_string(),
                resolved_url: format!("https://www.douyin.com/video/{}", trimmed),
            });
        }

        let url = find_url(trimmed)
            .ok_or_else(|| anyhow::anyhow!("No link found in share text"))?;

        if let Some(external_id) = extract_asset_id(&url) {
            return Ok(ShareLink {
                external_id,
                resolved_url: url,
            });
        }

        let resolved_url = self.follow_redirects(&url).await?;
        let external_id = extract_asset_id(&resolved_url).ok_or_else(|| {
            anyhow::anyhow!("Could not find a video id in {}", resolved_url)
        })?;

        Ok(ShareLink {
            external_id,
            resolved_url,
        })
    }

    async fn follow_redirects(&self, url: &str) -> Result<String> {
        tracing::debug!("Following share link redirects for: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to open share link {}", url))?;

        if !response.status().is_success() && !response.status().is_redirection() {
            anyhow::bail!("Share link returned HTTP {}", response.status());
        }

        Ok(response.url().to_string())
    }
}

/// Validate and normalize URLs
pub fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)
        .map_err(|_| anyhow::anyhow!("Invalid URL format: {}", url))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("URL must use HTTP or HTTPS protocol");
    }

    Ok(parsed)
}
