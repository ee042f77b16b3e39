//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Runtime helpers supporting the periodic tasks."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Fixed period ticker anchored to its creation time.
///
/// The first tick fires one full period after creation, like a wall clock
/// ticker, rather than immediately.
#[derive(Debug)]
pub struct PeriodicSchedule {
    interval: Interval,
}

impl PeriodicSchedule {
    /// Ticker that delays the schedule when a tick is missed.
    pub fn new(period: Duration) -> Self {
        Self::with_behavior(period, MissedTickBehavior::Delay)
    }

    /// Ticker that fires missed ticks back to back, keeping the original anchor.
    pub fn catch_up(period: Duration) -> Self {
        Self::with_behavior(period, MissedTickBehavior::Burst)
    }

    fn with_behavior(period: Duration, behavior: MissedTickBehavior) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(behavior);
        Self { interval }
    }

    /// Wait for the next tick and return the instant it was scheduled for.
    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}
