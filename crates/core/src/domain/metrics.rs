use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw per-agent counters. Only the owning agent's processing loop writes
/// them; everyone else reads a [`MetricsSnapshot`].
#[derive(Clone, Debug, Default, PartialEq)]
struct AgentMetrics {
    messages_processed: u64,
    messages_failed: u64,
    messages_rejected: u64,
    average_processing_time: Duration,
    last_activity: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub messages_rejected: u64,
    pub average_processing_time_ms: f64,
    pub last_activity: Option<DateTime<Utc>>,
    pub error_rate: f64,
    pub throughput_per_minute: f64,
}

#[derive(Debug, Default)]
pub struct MetricsRecorder {
    inner: Mutex<AgentMetrics>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_started(&self, at: DateTime<Utc>) {
        let mut metrics = self.lock();
        if metrics.started_at.is_none() {
            metrics.started_at = Some(at);
        }
    }

    pub fn record_success(&self, processing_time: Duration) {
        let mut metrics = self.lock();
        metrics.messages_processed += 1;
        metrics.last_activity = Some(Utc::now());
        metrics.average_processing_time =
            running_average(metrics.average_processing_time, processing_time);
    }

    /// Records a message that reached its final failed outcome.
    pub fn record_failure(&self) {
        let mut metrics = self.lock();
        metrics.messages_processed += 1;
        metrics.messages_failed += 1;
        metrics.last_activity = Some(Utc::now());
        metrics.average_processing_time =
            running_average(metrics.average_processing_time, Duration::ZERO);
    }

    pub fn record_rejection(&self) {
        self.lock().messages_rejected += 1;
    }

    pub fn error_rate(&self) -> f64 {
        let metrics = self.lock();
        error_rate(metrics.messages_failed, metrics.messages_processed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> MetricsSnapshot {
        let metrics = self.lock().clone();
        let throughput_per_minute = metrics
            .started_at
            .map(|started| (now - started).num_milliseconds() as f64 / 60_000.0)
            .filter(|minutes| *minutes > 0.0)
            .map(|minutes| metrics.messages_processed as f64 / minutes)
            .unwrap_or(0.0);

        MetricsSnapshot {
            messages_processed: metrics.messages_processed,
            messages_failed: metrics.messages_failed,
            messages_rejected: metrics.messages_rejected,
            average_processing_time_ms: metrics.average_processing_time.as_secs_f64() * 1_000.0,
            last_activity: metrics.last_activity,
            error_rate: error_rate(metrics.messages_failed, metrics.messages_processed),
            throughput_per_minute,
        }
    }

    fn lock(&self) -> MutexGuard<'_, AgentMetrics> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Not a true mean: each sample halves the weight of the history.
fn running_average(current: Duration, sample: Duration) -> Duration {
    if current.is_zero() {
        sample
    } else {
        (current + sample) / 2
    }
}

fn error_rate(failed: u64, processed: u64) -> f64 {
    if processed == 0 {
        0.0
    } else {
        failed as f64 / processed as f64
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, Utc};

    use super::MetricsRecorder;

    #[test]
    fn average_takes_first_sample_then_halves_history() {
        let recorder = MetricsRecorder::new();
        recorder.record_success(Duration::from_millis(100));
        assert_eq!(recorder.snapshot().average_processing_time_ms, 100.0);

        recorder.record_success(Duration::from_millis(300));
        assert_eq!(recorder.snapshot().average_processing_time_ms, 200.0);
    }

    #[test]
    fn error_rate_is_failures_over_total() {
        let recorder = MetricsRecorder::new();
        recorder.record_success(Duration::from_millis(5));
        recorder.record_success(Duration::from_millis(5));
        recorder.record_success(Duration::from_millis(5));
        recorder.record_failure();

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.messages_processed, 4);
        assert_eq!(snapshot.messages_failed, 1);
        assert!((snapshot.error_rate - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn throughput_uses_time_since_start() {
        let recorder = MetricsRecorder::new();
        let started = Utc::now();
        recorder.mark_started(started);
        for _ in 0..10 {
            recorder.record_success(Duration::from_millis(1));
        }

        let snapshot = recorder.snapshot_at(started + ChronoDuration::minutes(2));
        assert!((snapshot.throughput_per_minute - 5.0).abs() < 1e-9);
    }

    #[test]
    fn empty_recorder_reports_zeroes() {
        let snapshot = MetricsRecorder::new().snapshot();
        assert_eq!(snapshot.error_rate, 0.0);
        assert_eq!(snapshot.throughput_per_minute, 0.0);
        assert!(snapshot.last_activity.is_none());
    }
}
