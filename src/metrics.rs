//! Side-channel metrics recording.
//!
//! No control-flow decision anywhere in this crate may depend on whether a
//! metric was recorded, or on what a [`MetricsRecorder`] returns. Recording
//! is best-effort; a recorder that panics or is simply absent never changes
//! scheduling, focus, or UX-state behaviour.

use std::fmt;

/// A single best-effort metric observation emitted by the dialog UX
/// aggregator when a timer fires and drives a state transition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MetricEvent {
    /// Name of the event, e.g. `"THINKING_TIMEOUT_EXPIRES"`.
    pub name: &'static str,
}

impl fmt::Display for MetricEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Consumes metric events emitted by the core. Implementations must return
/// promptly; recording happens on the same executor that drives state
/// transitions.
pub trait MetricsRecorder: Send + Sync {
    /// Records one metric event.
    fn record(&self, event: MetricEvent);
}

/// A [`MetricsRecorder`] that discards every event. Used when no recorder
/// is configured, so call sites never need an `Option` check.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetricsRecorder;

impl MetricsRecorder for NoopMetricsRecorder {
    fn record(&self, _event: MetricEvent) {}
}
