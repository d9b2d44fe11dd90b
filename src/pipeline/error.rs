use super::steps::PipelineStep;

/// Failure of a pipeline run.
///
/// Every failure is either attributed to exactly one step, or is a
/// cancellation, which is step-agnostic and outranks any other
/// classification.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("{message}")]
    Step {
        message: String,
        step: PipelineStep,
        /// Rendered upstream error chain, kept for diagnostics only
        cause: Option<String>,
    },

    #[error("pipeline cancelled: {reason}")]
    Cancelled { reason: String },
}

impl PipelineError {
    pub fn step(step: PipelineStep, message: impl Into<String>) -> Self {
        PipelineError::Step {
            message: message.into(),
            step,
            cause: None,
        }
    }

    pub fn step_with_cause(
        step: PipelineStep,
        message: impl Into<String>,
        cause: &anyhow::Error,
    ) -> Self {
        PipelineError::Step {
            message: message.into(),
            step,
            cause: Some(format!("{:#}", cause)),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        PipelineError::Cancelled {
            reason: reason.into(),
        }
    }

    /// Convert a collaborator error into a step failure.
    ///
    /// A `PipelineError` carried inside the `anyhow::Error` (for example one
    /// raised by a progress callback) is returned unchanged.
    pub fn from_anyhow(step: PipelineStep, context: &str, err: anyhow::Error) -> Self {
        match err.downcast::<PipelineError>() {
            Ok(inner) => inner,
            Err(err) => {
                let message = format!("{}: {}", context, err);
                PipelineError::step_with_cause(step, message, &err)
            }
        }
    }

    /// Wrap an error that is neither a step failure nor a cancellation.
    ///
    /// Such errors are attributed to the first step so that every terminal
    /// event names a step.
    pub fn unknown(err: anyhow::Error) -> Self {
        Self::from_anyhow(PipelineStep::ParseLink, "unexpected error", err)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled { .. })
    }

    /// The step this failure is attributed to, `None` for cancellations.
    pub fn failed_step(&self) -> Option<PipelineStep> {
        match self {
            PipelineError::Step { step, .. } => Some(*step),
            PipelineError::Cancelled { .. } => None,
        }
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            PipelineError::Step { cause, .. } => cause.as_deref(),
            PipelineError::Cancelled { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_anyhow_keeps_nested_pipeline_error() {
        let inner = PipelineError::cancelled("user pressed stop");
        let wrapped = anyhow::Error::new(inner.clone());

        let err = PipelineError::from_anyhow(PipelineStep::DownloadVideo, "download failed", wrapped);
        assert_eq!(err, inner);
        assert!(err.failed_step().is_none());
    }

    #[test]
    fn test_from_anyhow_attributes_step_and_cause() {
        let source = anyhow::anyhow!("connection reset").context("HEAD request failed");
        let err = PipelineError::from_anyhow(PipelineStep::DownloadVideo, "download failed", source);

        assert_eq!(err.failed_step(), Some(PipelineStep::DownloadVideo));
        assert!(err.to_string().starts_with("download failed: HEAD request failed"));
        assert_eq!(err.cause(), Some("HEAD request failed: connection reset"));
    }

    #[test]
    fn test_unknown_is_attributed_to_parse_link() {
        let err = PipelineError::unknown(anyhow::anyhow!("boom"));
        assert_eq!(err.failed_step(), Some(PipelineStep::ParseLink));
        assert!(!err.is_cancelled());
    }
}
