//! Aggregate response statistics over attempt records.

use serde::Serialize;

use crate::{metrics::MetricsEvent, AttemptRecord, RecordedOutcome};

/// Accumulates attempt records into a [`StatsSnapshot`].
#[derive(Clone, Debug, Default)]
pub struct Stats {
    durations_ms: Vec<u64>,
    total_errors: u64,
    total_timeouts: u64,
    total_redirects: u64,
    total_bytes: u64,
}

impl Stats {
    pub fn record(&mut self, record: &AttemptRecord) {
        let millis = u64::try_from(record.duration.as_millis()).unwrap_or(u64::MAX);
        self.durations_ms.push(millis);

        match record.outcome {
            RecordedOutcome::Success { status, body_size } => {
                self.total_bytes = self.total_bytes.saturating_add(body_size);
                if status >= 400 {
                    self.total_errors += 1;
                } else if status >= 300 {
                    self.total_redirects += 1;
                }
            }
            RecordedOutcome::NetworkError { .. } => self.total_errors += 1,
            RecordedOutcome::Timeout => {
                self.total_errors += 1;
                self.total_timeouts += 1;
            }
        }
    }

    /// Feeds a metrics event; only completed attempts are counted.
    pub fn observe(&mut self, event: &MetricsEvent) {
        if let MetricsEvent::AttemptCompleted { record, .. } = event {
            self.record(record);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut sorted = self.durations_ms.clone();
        sorted.sort_unstable();

        let total_duration_ms = sorted.iter().fold(0u64, |acc, d| acc.saturating_add(*d));
        let count = sorted.len() as u64;
        let mean_duration_ms = if count == 0 {
            0.0
        } else {
            total_duration_ms as f64 / count as f64
        };

        StatsSnapshot {
            total_requests: count,
            total_errors: self.total_errors,
            total_timeouts: self.total_timeouts,
            total_redirects: self.total_redirects,
            total_bytes: self.total_bytes,
            total_duration_ms,
            min_duration_ms: sorted.first().copied().unwrap_or_default(),
            max_duration_ms: sorted.last().copied().unwrap_or_default(),
            mean_duration_ms,
            median_duration_ms: median(&sorted),
            duration_p10: percentile(&sorted, 0.10),
            duration_p25: percentile(&sorted, 0.25),
            duration_p50: percentile(&sorted, 0.50),
            duration_p75: percentile(&sorted, 0.75),
            duration_p90: percentile(&sorted, 0.90),
            duration_p95: percentile(&sorted, 0.95),
            duration_p99: percentile(&sorted, 0.99),
        }
    }
}

/// Point-in-time statistics; durations are in milliseconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_timeouts: u64,
    pub total_redirects: u64,
    pub total_bytes: u64,
    pub total_duration_ms: u64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub mean_duration_ms: f64,
    pub median_duration_ms: f64,
    pub duration_p10: f64,
    pub duration_p25: f64,
    pub duration_p50: f64,
    pub duration_p75: f64,
    pub duration_p90: f64,
    pub duration_p95: f64,
    pub duration_p99: f64,
}

fn median(sorted: &[u64]) -> f64 {
    let len = sorted.len();
    match len {
        0 => 0.0,
        _ if len % 2 == 0 => (sorted[len / 2 - 1] + sorted[len / 2]) as f64 / 2.0,
        _ => sorted[len / 2] as f64,
    }
}

/// Nearest-rank percentile over an ascending sample.
fn percentile(sorted: &[u64], quantile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let last = sorted.len() - 1;
    let index = (last as f64 * quantile).round() as usize;
    sorted[index.min(last)] as f64
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::{median, percentile, Stats, StatsSnapshot};
    use crate::{metrics::MetricsEvent, AttemptRecord, NetworkErrorKind, RecordedOutcome};

    fn record(duration_ms: u64, outcome: RecordedOutcome) -> AttemptRecord {
        AttemptRecord {
            attempt_index: 0,
            started_at: SystemTime::now(),
            duration: Duration::from_millis(duration_ms),
            outcome,
        }
    }

    fn ok(status: u16, body_size: u64) -> RecordedOutcome {
        RecordedOutcome::Success { status, body_size }
    }

    #[test]
    fn empty_sample_is_all_zero() {
        assert_eq!(Stats::default().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn percentiles_use_nearest_rank() {
        let sample: Vec<u64> = (1..=10).collect();
        assert_eq!(percentile(&sample, 0.10), 2.0);
        assert_eq!(percentile(&sample, 0.50), 6.0);
        assert_eq!(percentile(&sample, 0.99), 10.0);
        assert_eq!(median(&sample), 5.5);
        assert_eq!(median(&[3, 9, 27]), 9.0);
    }

    #[test]
    fn counts_errors_redirects_and_bytes() {
        let mut stats = Stats::default();
        stats.record(&record(10, ok(200, 12)));
        stats.record(&record(30, ok(302, 0)));
        stats.record(&record(20, ok(404, 9)));
        stats.record(&record(
            40,
            RecordedOutcome::NetworkError {
                kind: NetworkErrorKind::Status(500),
            },
        ));
        stats.observe(&MetricsEvent::AttemptCompleted {
            dispatch_id: 1,
            record: record(50, RecordedOutcome::Timeout),
        });
        stats.observe(&MetricsEvent::AttemptStarted {
            dispatch_id: 1,
            attempt_index: 1,
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 5);
        assert_eq!(snapshot.total_errors, 3);
        assert_eq!(snapshot.total_timeouts, 1);
        assert_eq!(snapshot.total_redirects, 1);
        assert_eq!(snapshot.total_bytes, 21);
        assert_eq!(snapshot.total_duration_ms, 150);
        assert_eq!(snapshot.min_duration_ms, 10);
        assert_eq!(snapshot.max_duration_ms, 50);
        assert_eq!(snapshot.mean_duration_ms, 30.0);
        assert_eq!(snapshot.median_duration_ms, 30.0);
    }
}
