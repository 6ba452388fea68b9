//! Send and consume counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters for one template's outbound path
#[derive(Debug, Default)]
pub struct SendMetrics {
    pub records_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub send_errors: AtomicU64,
    pub transactions_begun: AtomicU64,
    pub send_latency_sum: AtomicU64,
    pub send_latency_count: AtomicU64,
}

impl SendMetrics {
    /// Record a successful send operation
    pub fn record_send(&self, byte_count: u64, latency: Duration) {
        self.records_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
        self.send_latency_sum
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.send_latency_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a send error
    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transaction_begun(&self) {
        self.transactions_begun.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average send latency in microseconds
    pub fn average_send_latency_us(&self) -> f64 {
        let sum = self.send_latency_sum.load(Ordering::Relaxed);
        let count = self.send_latency_count.load(Ordering::Relaxed);

        if count == 0 {
            0.0
        } else {
            sum as f64 / count as f64
        }
    }

    pub fn snapshot(&self) -> SendMetricsSnapshot {
        SendMetricsSnapshot {
            records_sent: self.records_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            transactions_begun: self.transactions_begun.load(Ordering::Relaxed),
            average_send_latency_us: self.average_send_latency_us(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendMetricsSnapshot {
    pub records_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
    pub transactions_begun: u64,
    pub average_send_latency_us: f64,
}

/// Counters for one container's inbound path
#[derive(Debug, Default)]
pub struct ConsumeMetrics {
    pub messages_consumed: AtomicU64,
    pub bytes_consumed: AtomicU64,
    pub consume_failures: AtomicU64,
}

impl ConsumeMetrics {
    pub fn record_consumed(&self, byte_count: u64) {
        self.messages_consumed.fetch_add(1, Ordering::Relaxed);
        self.bytes_consumed.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.consume_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConsumeMetricsSnapshot {
        ConsumeMetricsSnapshot {
            messages_consumed: self.messages_consumed.load(Ordering::Relaxed),
            bytes_consumed: self.bytes_consumed.load(Ordering::Relaxed),
            consume_failures: self.consume_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeMetricsSnapshot {
    pub messages_consumed: u64,
    pub bytes_consumed: u64,
    pub consume_failures: u64,
}

/// Timing helper for measuring operation latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_average_latency() {
        let metrics = SendMetrics::default();
        assert_eq!(metrics.average_send_latency_us(), 0.0);

        metrics.record_send(10, Duration::from_micros(100));
        metrics.record_send(30, Duration::from_micros(300));
        metrics.record_send_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.records_sent, 2);
        assert_eq!(snapshot.bytes_sent, 40);
        assert_eq!(snapshot.send_errors, 1);
        assert_eq!(snapshot.average_send_latency_us, 200.0);
    }

    #[test]
    fn test_consume_snapshot() {
        let metrics = ConsumeMetrics::default();
        metrics.record_consumed(5);
        metrics.record_failure();
        assert_eq!(
            metrics.snapshot(),
            ConsumeMetricsSnapshot {
                messages_consumed: 1,
                bytes_consumed: 5,
                consume_failures: 1,
            }
        );
    }
}
