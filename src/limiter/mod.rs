use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Admits at most one request per period. The first admission is immediate;
/// idle time is not banked, so a late caller gets one admission and the next
/// one waits a full period again.
#[derive(Debug)]
pub struct Pacer {
    interval: Interval,
}

impl Pacer {
    /// Returns `None` for a zero period, which disables pacing.
    pub fn new(period: Duration) -> Option<Self> {
        if period.is_zero() {
            return None;
        }

        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(Self { interval })
    }

    /// Waits for the next admission. Cancel-safe: dropping the future before
    /// it completes does not consume an admission.
    pub async fn admit(&mut self) -> Instant {
        self.interval.tick().await
    }
}
