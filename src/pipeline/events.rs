use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use super::error::PipelineError;
use super::steps::{PipelineStep, StepStatus};
use super::timer::{percentage, StepTimer};
use crate::provider::VideoInfo;

/// Snapshot of where a run stands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step: PipelineStep,
    pub status: StepStatus,
    pub index: usize,
    pub total: usize,
    pub percentage: u8,
    pub label: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProgressEvent {
    pub fn new(step: PipelineStep, status: StepStatus, detail: Option<String>) -> Self {
        Self {
            step,
            status,
            index: step.index(),
            total: PipelineStep::TOTAL,
            percentage: percentage(step.index(), status),
            label: step.label().to_string(),
            description: step.description().to_string(),
            detail,
        }
    }
}

/// Which streamed document a partial event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialKey {
    Transcript,
    Markdown,
}

/// Everything a run tells its consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PipelineEvent {
    Progress(ProgressEvent),

    Info {
        #[serde(rename = "videoInfo")]
        video_info: VideoInfo,
    },

    Partial {
        key: PartialKey,
        data: String,
        append: bool,
    },

    Done {
        markdown: String,
        #[serde(rename = "videoInfo")]
        video_info: VideoInfo,
        transcript: String,
    },

    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<PipelineStep>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
    },
}

impl PipelineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Done { .. } | PipelineEvent::Error { .. })
    }

    pub fn from_error(err: &PipelineError) -> Self {
        let message = match err {
            PipelineError::Cancelled { .. } => "Run cancelled".to_string(),
            PipelineError::Step { message, .. } => message.clone(),
        };

        PipelineEvent::Error {
            message,
            step: err.failed_step(),
            cause: match err {
                PipelineError::Cancelled { reason } => Some(reason.clone()),
                PipelineError::Step { cause, .. } => cause.clone(),
            },
        }
    }
}

/// Emits events for one run and keeps its step timer.
///
/// A closed receiver is not an error: the run keeps going and its result is
/// still returned to the caller.
pub struct Reporter {
    sink: UnboundedSender<PipelineEvent>,
    timer: StepTimer,
}

impl Reporter {
    pub fn new(sink: UnboundedSender<PipelineEvent>) -> Self {
        Self {
            sink,
            timer: StepTimer::new(),
        }
    }

    pub fn emit(&self, event: PipelineEvent) {
        if self.sink.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }

    pub fn active(&mut self, step: PipelineStep, detail: Option<&str>) {
        self.timer.mark_active(step);
        let detail = self.timer.elapsed_detail(step, detail);
        self.emit(PipelineEvent::Progress(ProgressEvent::new(step, StepStatus::Active, detail)));
    }

    pub fn completed(&mut self, step: PipelineStep, detail: Option<&str>) {
        let detail = self.timer.elapsed_detail(step, detail);
        self.emit(PipelineEvent::Progress(ProgressEvent::new(step, StepStatus::Completed, detail)));
    }

    pub fn failed(&mut self, step: PipelineStep, detail: Option<&str>) {
        let detail = self.timer.elapsed_detail(step, detail);
        self.emit(PipelineEvent::Progress(ProgressEvent::new(step, StepStatus::Error, detail)));
    }

    pub fn partial(&self, key: PartialKey, data: impl Into<String>, append: bool) {
        self.emit(PipelineEvent::Partial {
            key,
            data: data.into(),
            append,
        });
    }
}
