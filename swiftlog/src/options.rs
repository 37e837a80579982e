//! Backend and frontend configuration

use std::sync::Arc;
use std::time::Duration;

/// Receives diagnostics the backend cannot deliver as log records: failure
/// counter reports, allocation notices, formatting and sink errors.
pub type ErrorNotifier = Arc<dyn Fn(&str) + Send + Sync>;

pub fn default_error_notifier() -> ErrorNotifier {
    Arc::new(|message| eprintln!("{message}"))
}

#[derive(Clone)]
pub struct BackendOptions {
    /// Condition-variable timeout when the worker has nothing to do.
    pub sleep_duration: Duration,
    /// Yield instead of sleeping when `sleep_duration` is zero.
    pub enable_yield_when_idle: bool,
    /// Below this many cached events the worker processes one event per
    /// loop, giving the frontend queues another turn.
    pub transit_events_soft_limit: usize,
    /// Per-thread ceiling on cached events during a drain round.
    pub transit_events_hard_limit: usize,
    pub transit_event_buffer_initial_capacity: usize,
    /// How often the TSC correlation is refreshed. Must be at least
    /// `sleep_duration` when a TSC-sourced logger is in use.
    pub rdtsc_resync_interval: Duration,
    /// Defer records whose timestamp has not passed yet so cross-producer
    /// dispatch order is non-decreasing in timestamp.
    pub enable_strict_log_timestamp_order: bool,
    pub wait_for_queues_to_empty_before_exit: bool,
    pub backend_cpu_affinity: Option<usize>,
    pub thread_name: String,
    pub error_notifier: ErrorNotifier,
}

impl Default for BackendOptions {
    fn default() -> Self {
        // the env override mirrors how deployments tune the flush cadence
        // without a recompile
        const DEFAULT_SLEEP_US: u64 = 500;
        let sleep_us = std::env::var("SWIFTLOG_SLEEP_DURATION_US")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_SLEEP_US);
        Self {
            sleep_duration: Duration::from_micros(sleep_us),
            enable_yield_when_idle: false,
            transit_events_soft_limit: 800,
            transit_events_hard_limit: 100_000,
            transit_event_buffer_initial_capacity: 128,
            rdtsc_resync_interval: Duration::from_millis(500),
            enable_strict_log_timestamp_order: false,
            wait_for_queues_to_empty_before_exit: true,
            backend_cpu_affinity: None,
            thread_name: "swiftlog-backend".to_owned(),
            error_notifier: default_error_notifier(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Fixed capacity; records that do not fit are dropped and counted.
    BoundedDropping,
    /// Fixed capacity; the producer spins until space frees up, counting
    /// each blocking occurrence.
    BoundedBlocking,
    /// Grows by chaining larger segments; never fails unless
    /// `unbounded_max_capacity` is set.
    Unbounded,
}

/// Per-runtime producer-side configuration, applied to every thread context
/// the runtime creates.
#[derive(Debug, Clone)]
pub struct FrontendOptions {
    pub queue_kind: QueueKind,
    /// Initial (or fixed, for bounded kinds) queue capacity in bytes;
    /// rounded up to a power of two.
    pub queue_capacity: usize,
    /// Growth ceiling for unbounded queues; writes past it fail and count
    /// as dropped.
    pub unbounded_max_capacity: Option<usize>,
}

impl Default for FrontendOptions {
    fn default() -> Self {
        Self {
            queue_kind: QueueKind::Unbounded,
            queue_capacity: 128 * 1024,
            unbounded_max_capacity: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = BackendOptions::default();
        assert!(options.transit_events_soft_limit >= 1);
        assert!(options.transit_events_hard_limit >= options.transit_events_soft_limit);
        assert!(options.rdtsc_resync_interval >= options.sleep_duration);
        assert!(options.wait_for_queues_to_empty_before_exit);
    }
}
