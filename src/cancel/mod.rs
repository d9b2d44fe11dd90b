//! Cooperative cancellation for pipeline runs.
//!
//! A [`CancelSignal`] is a cloneable handle around a
//! [`tokio_util::sync::CancellationToken`] that also remembers *why* it was
//! triggered. [`compose`] builds the per-call signal used by every network
//! call: an optional deadline merged with the caller's signal.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::pipeline::PipelineError;

/// Why a signal fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// The composed deadline elapsed.
    Timeout(String),
    /// Someone outside the current call cancelled it.
    Aborted(String),
}

impl CancelReason {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CancelReason::Timeout(_))
    }

    pub fn message(&self) -> &str {
        match self {
            CancelReason::Timeout(message) | CancelReason::Aborted(message) => message,
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Cloneable cancellation handle with a set-once reason.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the signal. The first reason wins; later calls are no-ops.
    pub fn cancel(&self, reason: CancelReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    /// Trigger the signal with the generic "cancelled" reason.
    pub fn abort(&self) {
        self.cancel(CancelReason::Aborted("cancelled".to_string()));
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        if !self.is_cancelled() {
            return None;
        }
        Some(
            self.reason
                .get()
                .cloned()
                .unwrap_or_else(|| CancelReason::Aborted("cancelled".to_string())),
        )
    }

    /// Resolves once the signal has been triggered.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Fail with [`PipelineError::Cancelled`] if the signal has fired.
    pub fn checkpoint(&self) -> Result<(), PipelineError> {
        match self.reason() {
            Some(reason) => Err(PipelineError::cancelled(reason.message())),
            None => Ok(()),
        }
    }

    /// The error to report once the signal has fired
    pub fn cancellation_error(&self) -> PipelineError {
        let reason = self.reason();
        PipelineError::cancelled(reason.as_ref().map_or("cancelled", CancelReason::message))
    }
}

/// Releases the timer and the listener of a composed signal.
///
/// Dropping the guard has the same effect as calling [`AbortGuard::cleanup`],
/// so every exit path (`?`, early return, cancellation of the enclosing
/// future) releases them.
#[derive(Debug)]
pub struct AbortGuard {
    watcher: Option<JoinHandle<()>>,
}

impl AbortGuard {
    pub fn cleanup(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Compose an optional timeout with an optional external signal.
///
/// The returned signal fires with [`CancelReason::Timeout`] carrying
/// `timeout_message` once `timeout` elapses, or with the external signal's
/// reason (as [`CancelReason::Aborted`]) when the external signal fires. An
/// external signal that is already triggered makes the composite fire
/// immediately. When both are ready at once the external reason wins.
///
/// Must be called inside a tokio runtime when a timeout or an untriggered
/// external signal is supplied.
pub fn compose(
    timeout: Option<Duration>,
    timeout_message: &str,
    external: Option<&CancelSignal>,
) -> (CancelSignal, AbortGuard) {
    let composite = CancelSignal::new();
    let timeout = timeout.filter(|duration| !duration.is_zero());

    if let Some(external) = external {
        if let Some(reason) = external.reason() {
            composite.cancel(CancelReason::Aborted(reason.message().to_string()));
            return (composite, AbortGuard { watcher: None });
        }
    }

    if timeout.is_none() && external.is_none() {
        return (composite, AbortGuard { watcher: None });
    }

    let target = composite.clone();
    let external = external.cloned();
    let timeout_message = timeout_message.to_string();

    let watcher = tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        let external_fired = async {
            match &external {
                Some(signal) => signal.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            _ = external_fired => {
                let reason = external
                    .as_ref()
                    .and_then(CancelSignal::reason)
                    .map(|reason| reason.message().to_string())
                    .unwrap_or_else(|| "cancelled".to_string());
                target.cancel(CancelReason::Aborted(reason));
            }
            _ = deadline => {
                target.cancel(CancelReason::Timeout(timeout_message));
            }
        }
    });

    (composite, AbortGuard { watcher: Some(watcher) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let signal = CancelSignal::new();
        signal.cancel(CancelReason::Timeout("too slow".to_string()));
        signal.abort();

        assert_eq!(signal.reason(), Some(CancelReason::Timeout("too slow".to_string())));
        assert!(signal.checkpoint().is_err());
    }

    #[test]
    fn test_untriggered_signal_passes_checkpoint() {
        let signal = CancelSignal::new();
        assert!(signal.reason().is_none());
        assert!(signal.checkpoint().is_ok());
    }

    #[tokio::test]
    async fn test_already_triggered_external_fires_immediately() {
        let external = CancelSignal::new();
        external.cancel(CancelReason::Aborted("user closed the page".to_string()));

        let (composite, guard) = compose(Some(Duration::from_secs(60)), "timed out", Some(&external));
        assert_eq!(
            composite.reason(),
            Some(CancelReason::Aborted("user closed the page".to_string()))
        );
        guard.cleanup();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_with_message() {
        let (composite, _guard) = compose(Some(Duration::from_millis(50)), "request timed out", None);
        composite.cancelled().await;

        let reason = composite.reason().unwrap();
        assert!(reason.is_timeout());
        assert_eq!(reason.message(), "request timed out");
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_propagates_before_timeout() {
        let external = CancelSignal::new();
        let (composite, _guard) = compose(Some(Duration::from_secs(30)), "timed out", Some(&external));

        external.abort();
        composite.cancelled().await;

        let reason = composite.reason().unwrap();
        assert!(!reason.is_timeout());
        assert_eq!(reason.message(), "cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_detaches_timer_and_listener() {
        let external = CancelSignal::new();
        let (composite, guard) = compose(Some(Duration::from_millis(10)), "timed out", Some(&external));
        guard.cleanup();

        tokio::time::sleep(Duration::from_millis(50)).await;
        external.abort();
        tokio::task::yield_now().await;

        assert!(!composite.is_cancelled());
    }

    #[tokio::test]
    async fn test_zero_timeout_means_no_deadline() {
        let (composite, _guard) = compose(Some(Duration::ZERO), "timed out", None);
        tokio::task::yield_now().await;
        assert!(!composite.is_cancelled());
    }
}
