use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running counters exposed through `Trigger::statistics` (§9, Design
/// Notes), mirrored into the `metrics` facade so the same numbers surface
/// on `/metrics` without embedders having to poll `statistics()`. The
/// source keeps an internal `UpdateStatistics` struct purely for its own
/// dashboards; this does both: an in-process snapshot for the trait, and a
/// Prometheus counter for the scrape endpoint.
#[derive(Default)]
pub struct TriggerStatistics {
    events_handled: AtomicU64,
    events_handled_success: AtomicU64,
    events_handled_failure: AtomicU64,
    events_committed: AtomicU64,
    events_dropped_no_ack: AtomicU64,
}

#[derive(Clone, Debug, Serialize, Default, PartialEq, Eq)]
pub struct TriggerStatisticsSnapshot {
    pub events_handled: u64,
    pub events_handled_success: u64,
    pub events_handled_failure: u64,
    pub events_committed: u64,
    pub events_dropped_no_ack: u64,
}

impl TriggerStatistics {
    pub fn record_success(&self) {
        self.events_handled.fetch_add(1, Ordering::Relaxed);
        self.events_handled_success.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("event_trigger_events_handled_total", &[("outcome", "success")]).increment(1);
    }

    pub fn record_failure(&self) {
        self.events_handled.fetch_add(1, Ordering::Relaxed);
        self.events_handled_failure.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("event_trigger_events_handled_total", &[("outcome", "failure")]).increment(1);
    }

    pub fn record_commit(&self) {
        self.events_committed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("event_trigger_events_committed_total").increment(1);
    }

    pub fn record_dropped_no_ack(&self) {
        self.events_dropped_no_ack.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("event_trigger_events_dropped_no_ack_total").increment(1);
    }

    pub fn snapshot(&self) -> TriggerStatisticsSnapshot {
        TriggerStatisticsSnapshot {
            events_handled: self.events_handled.load(Ordering::Relaxed),
            events_handled_success: self.events_handled_success.load(Ordering::Relaxed),
            events_handled_failure: self.events_handled_failure.load(Ordering::Relaxed),
            events_committed: self.events_committed.load(Ordering::Relaxed),
            events_dropped_no_ack: self.events_dropped_no_ack.load(Ordering::Relaxed),
        }
    }
}
