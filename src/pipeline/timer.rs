use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::steps::{PipelineStep, StepStatus};

/// Tracks when each step first became active.
#[derive(Debug, Default)]
pub struct StepTimer {
    started: HashMap<PipelineStep, Instant>,
}

impl StepTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of `step`. Only the first call per step counts.
    pub fn mark_active(&mut self, step: PipelineStep) {
        self.started.entry(step).or_insert_with(Instant::now);
    }

    pub fn elapsed(&self, step: PipelineStep) -> Option<Duration> {
        self.started.get(&step).map(Instant::elapsed)
    }

    /// Append the step's elapsed time to `base_detail`.
    ///
    /// Returns `base_detail` unchanged when the step was never started.
    pub fn elapsed_detail(&self, step: PipelineStep, base_detail: Option<&str>) -> Option<String> {
        let Some(elapsed) = self.elapsed(step) else {
            return base_detail.map(str::to_string);
        };

        let duration = format_elapsed(elapsed);
        match base_detail.filter(|detail| !detail.is_empty()) {
            Some(detail) => Some(format!("{}, {}", detail, duration)),
            None => Some(duration),
        }
    }
}

/// `500ms`, `3.4s`, `15s`
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis >= 10_000 {
        format!("{}s", (millis as f64 / 1000.0).round() as u64)
    } else {
        format!("{:.1}s", millis as f64 / 1000.0)
    }
}

/// Overall completion after the step at `step_index` reaches `status`.
pub fn percentage(step_index: usize, status: StepStatus) -> u8 {
    let completed_steps = if status == StepStatus::Completed {
        step_index + 1
    } else {
        step_index
    };

    let ratio = completed_steps as f64 / PipelineStep::TOTAL as f64 * 100.0;
    ratio.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(500)), "500ms");
        assert_eq!(format_elapsed(Duration::from_millis(0)), "0ms");
        assert_eq!(format_elapsed(Duration::from_millis(3400)), "3.4s");
        assert_eq!(format_elapsed(Duration::from_millis(1000)), "1.0s");
        assert_eq!(format_elapsed(Duration::from_millis(15_000)), "15s");
        assert_eq!(format_elapsed(Duration::from_millis(10_400)), "10s");
        assert_eq!(format_elapsed(Duration::from_millis(10_600)), "11s");
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, StepStatus::Active), 0);
        assert_eq!(percentage(0, StepStatus::Completed), 14);
        assert_eq!(percentage(3, StepStatus::Active), 43);
        assert_eq!(percentage(3, StepStatus::Error), 43);
        assert_eq!(percentage(6, StepStatus::Active), 86);
        assert_eq!(percentage(6, StepStatus::Completed), 100);
        assert_eq!(percentage(40, StepStatus::Completed), 100);
    }

    #[test]
    fn test_mark_active_is_idempotent() {
        let mut timer = StepTimer::new();
        timer.mark_active(PipelineStep::FetchDetail);
        let first = timer.started[&PipelineStep::FetchDetail];

        std::thread::sleep(Duration::from_millis(5));
        timer.mark_active(PipelineStep::FetchDetail);
        assert_eq!(timer.started[&PipelineStep::FetchDetail], first);
    }

    #[test]
    fn test_elapsed_detail() {
        let mut timer = StepTimer::new();
        assert_eq!(timer.elapsed_detail(PipelineStep::ParseLink, Some("resolving")).as_deref(), Some("resolving"));
        assert_eq!(timer.elapsed_detail(PipelineStep::ParseLink, None), None);

        timer.mark_active(PipelineStep::ParseLink);
        let detail = timer.elapsed_detail(PipelineStep::ParseLink, Some("id 42")).unwrap();
        assert!(detail.starts_with("id 42, "));
        assert!(detail.ends_with("ms"));

        let bare = timer.elapsed_detail(PipelineStep::ParseLink, None).unwrap();
        assert!(bare.ends_with("ms"));
    }
}
