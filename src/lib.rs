//! ClipScribe - turn a short-video share link into a transcript report
//!
//! The library resolves a share link to a playable video, downloads it,
//! extracts and transcribes the audio track, corrects the transcript against
//! the video's metadata and streams a markdown report, reporting progress as
//! a stream of [`PipelineEvent`]s.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod extractors;
pub mod media;
pub mod optimize;
pub mod output;
pub mod pipeline;
pub mod provider;
pub mod resolver;
pub mod transcribe;
pub mod utils;

pub use cancel::{CancelReason, CancelSignal};
pub use cli::{Cli, Commands};
pub use config::Config;
pub use pipeline::{
    Pipeline, PipelineError, PipelineEvent, PipelineParts, PipelineResult, PipelineStep,
    ProgressEvent, StepStatus,
};
pub use provider::VideoInfo;

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;
