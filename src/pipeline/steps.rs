use serde::{Deserialize, Serialize};
use std::fmt;

/// The seven ordered units of work in a run.
///
/// Declaration order is execution order, and it drives the percentage math
/// in [`super::timer::percentage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStep {
    ParseLink,
    FetchDetail,
    DownloadVideo,
    ExtractAudio,
    TranscribeAudio,
    Optimize,
    Summarize,
}

impl PipelineStep {
    /// All steps in execution order.
    pub const ALL: [PipelineStep; 7] = [
        PipelineStep::ParseLink,
        PipelineStep::FetchDetail,
        PipelineStep::DownloadVideo,
        PipelineStep::ExtractAudio,
        PipelineStep::TranscribeAudio,
        PipelineStep::Optimize,
        PipelineStep::Summarize,
    ];

    pub const TOTAL: usize = Self::ALL.len();

    /// Zero-based position in the step sequence
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStep::ParseLink => "parse-link",
            PipelineStep::FetchDetail => "fetch-detail",
            PipelineStep::DownloadVideo => "download-video",
            PipelineStep::ExtractAudio => "extract-audio",
            PipelineStep::TranscribeAudio => "transcribe-audio",
            PipelineStep::Optimize => "optimize",
            PipelineStep::Summarize => "summarize",
        }
    }

    /// Short human-readable label shown next to the progress bar.
    pub fn label(self) -> &'static str {
        match self {
            PipelineStep::ParseLink => "Parse link",
            PipelineStep::FetchDetail => "Fetch details",
            PipelineStep::DownloadVideo => "Download video",
            PipelineStep::ExtractAudio => "Extract audio",
            PipelineStep::TranscribeAudio => "Transcribe audio",
            PipelineStep::Optimize => "Optimize transcript",
            PipelineStep::Summarize => "Build report",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            PipelineStep::ParseLink => "Resolve the share link to a video id",
            PipelineStep::FetchDetail => "Fetch video metadata and a playable address",
            PipelineStep::DownloadVideo => "Download the video stream",
            PipelineStep::ExtractAudio => "Re-encode the audio track as 16kHz mono MP3",
            PipelineStep::TranscribeAudio => "Stream speech recognition results",
            PipelineStep::Optimize => "Clean up and correct the transcript",
            PipelineStep::Summarize => "Render the markdown report",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single step: `Pending -> Active* -> Completed | Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Active,
    Completed,
    Error,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order_matches_index() {
        for (position, step) in PipelineStep::ALL.iter().enumerate() {
            assert_eq!(step.index(), position);
        }
        assert_eq!(PipelineStep::TOTAL, 7);
    }

    #[test]
    fn test_step_serializes_kebab_case() {
        let json = serde_json::to_string(&PipelineStep::TranscribeAudio).unwrap();
        assert_eq!(json, "\"transcribe-audio\"");
        assert_eq!(PipelineStep::DownloadVideo.to_string(), "download-video");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Active.is_terminal());
        assert!(StepStatus::Completed.is_terminal());
        assert!(StepStatus::Error.is_terminal());
    }
}
