//! Picks the single best playable URL out of the overlapping candidate lists
//! an asset detail carries.
//!
//! Candidates get a numeric priority (lower is better):
//!
//! | source                 | priority                                   |
//! |------------------------|--------------------------------------------|
//! | separate audio track   | 0                                          |
//! | low bitrate fallback   | 1                                          |
//! | bitrate ladder entry   | `clamp(2 + round(bps / 1_000_000), 2, 9)`, 4 when unknown |
//! | standard play address  | 8                                          |
//! | raw download address   | 9                                          |
//!
//! Duplicates keep their best priority. Ties prefer URLs served from the
//! platform's own CDN, then the shorter URL.

use std::collections::HashMap;

use crate::provider::{AssetDetail, UrlList};

/// Path fragment of watermarked playback URLs
pub const WATERMARK_MARKER: &str = "playwm";

/// Replacement for [`WATERMARK_MARKER`] that yields the clean variant
pub const CLEAN_MARKER: &str = "play";

/// Host fragment of the platform's own video CDN
pub const AUTHENTIC_SOURCE_MARKER: &str = "douyinvod.com";

const PRIORITY_AUDIO_TRACK: u8 = 0;
const PRIORITY_LOW_BITRATE: u8 = 1;
const PRIORITY_UNKNOWN_BITRATE: u8 = 4;
const PRIORITY_PLAY_ADDR: u8 = 8;
const PRIORITY_DOWNLOAD_ADDR: u8 = 9;

/// A candidate URL with its priority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub priority: u8,
}

/// Priority of a bitrate ladder entry
pub fn bitrate_priority(bit_rate: Option<u64>) -> u8 {
    match bit_rate {
        Some(bps) => {
            let step = (bps as f64 / 1_000_000.0).round();
            (2.0 + step).clamp(2.0, 9.0) as u8
        }
        None => PRIORITY_UNKNOWN_BITRATE,
    }
}

/// Rewrite the watermark marker to its clean equivalent
pub fn strip_watermark(url: &str) -> String {
    url.replace(WATERMARK_MARKER, CLEAN_MARKER)
}

/// Collects candidates, keeping the first-seen order for stable tie-breaking
#[derive(Default)]
struct CandidateSet {
    order: Vec<String>,
    priorities: HashMap<String, u8>,
}

impl CandidateSet {
    fn add(&mut self, raw: &str, priority: u8) {
        let raw = raw.trim();
        if raw.is_empty() {
            return;
        }

        let url = strip_watermark(raw);
        match self.priorities.get_mut(&url) {
            Some(existing) => *existing = (*existing).min(priority),
            None => {
                self.priorities.insert(url.clone(), priority);
                self.order.push(url);
            }
        }
    }

    fn add_list(&mut self, list: Option<&UrlList>, priority: u8) {
        if let Some(list) = list {
            for url in &list.url_list {
                self.add(url, priority);
            }
        }
    }

    fn into_sorted(self) -> Vec<Candidate> {
        let CandidateSet { order, priorities } = self;
        let mut candidates: Vec<Candidate> = order
            .into_iter()
            .map(|url| {
                let priority = priorities[&url];
                Candidate { url, priority }
            })
            .collect();

        candidates.sort_by_key(|candidate| {
            (
                candidate.priority,
                !candidate.url.contains(AUTHENTIC_SOURCE_MARKER),
                candidate.url.len(),
            )
        });
        candidates
    }
}

/// All de-duplicated candidates, best first
pub fn rank_candidates(detail: &AssetDetail) -> Vec<Candidate> {
    let video = &detail.video;
    let mut set = CandidateSet::default();

    set.add_list(video.audio_addr.as_ref(), PRIORITY_AUDIO_TRACK);
    set.add_list(video.play_addr_lowbr.as_ref(), PRIORITY_LOW_BITRATE);
    for entry in &video.bit_rate {
        set.add_list(Some(&entry.play_addr), bitrate_priority(entry.bit_rate));
    }
    set.add_list(video.play_addr.as_ref(), PRIORITY_PLAY_ADDR);
    set.add_list(video.download_addr.as_ref(), PRIORITY_DOWNLOAD_ADDR);

    set.into_sorted()
}

/// The best playable URL, or `None` when the detail carries no candidates
pub fn resolve(detail: &AssetDetail) -> Option<String> {
    rank_candidates(detail)
        .into_iter()
        .next()
        .map(|candidate| candidate.url)
}
