use crate::client::RequestError;
use crate::request::Outcome;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Run-wide counters, updated concurrently by aggregation tasks.
#[derive(Debug)]
pub struct RunStatistics {
    sent: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    connect_errors: AtomicU64,
    status_errors: AtomicU64,
    total_duration_nanos: AtomicU64,
    max_duration_nanos: AtomicU64,
    started_at: Instant,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            connect_errors: AtomicU64::new(0),
            status_errors: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
            max_duration_nanos: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Folds one outcome into the counters.
    pub fn record(&self, outcome: &Outcome) {
        if let Some(error) = &outcome.error {
            self.errors.fetch_add(1, Ordering::Relaxed);
            match error {
                RequestError::Timeout => self.timeouts.fetch_add(1, Ordering::Relaxed),
                RequestError::Connect(_) => self.connect_errors.fetch_add(1, Ordering::Relaxed),
                RequestError::Status(_) => self.status_errors.fetch_add(1, Ordering::Relaxed),
                RequestError::Transport(_) | RequestError::Build(_) => 0,
            };
            debug!(error = %error, "Request failed");
        }

        let nanos = u64::try_from(outcome.duration.as_nanos()).unwrap_or(u64::MAX);
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_duration_nanos.fetch_max(nanos, Ordering::Relaxed);
        debug!(status = outcome.status, duration = ?outcome.duration, "Request completed");
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Computes final metrics. Only meaningful once every aggregation task
    /// has finished.
    pub fn report(&self) -> Report {
        self.report_at(self.started_at.elapsed())
    }

    fn report_at(&self, elapsed: Duration) -> Report {
        let sent = self.sent();
        let total = self.total_duration_nanos.load(Ordering::Relaxed);

        let average_request_duration = if sent > 0 {
            Duration::from_nanos(total / sent)
        } else {
            Duration::ZERO
        };
        let requests_per_second = if elapsed.is_zero() {
            0.0
        } else {
            sent as f64 / elapsed.as_secs_f64()
        };

        Report {
            sent_requests: sent,
            errors: self.errors(),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            connect_errors: self.connect_errors.load(Ordering::Relaxed),
            status_errors: self.status_errors.load(Ordering::Relaxed),
            average_request_duration,
            max_request_duration: Duration::from_nanos(
                self.max_duration_nanos.load(Ordering::Relaxed),
            ),
            requests_per_second,
            elapsed,
        }
    }
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub sent_requests: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub connect_errors: u64,
    pub status_errors: u64,
    pub average_request_duration: Duration,
    pub max_request_duration: Duration,
    pub requests_per_second: f64,
    pub elapsed: Duration,
}

impl Report {
    pub fn log(&self) {
        info!(
            sent_requests = self.sent_requests,
            errors = self.errors,
            timeouts = self.timeouts,
            connect_errors = self.connect_errors,
            status_errors = self.status_errors,
            average_request_duration = ?self.average_request_duration,
            max_request_duration = ?self.max_request_duration,
            requests_per_second = self.requests_per_second,
            elapsed = ?self.elapsed,
            "Network throughput testing finished"
        );
    }
}
