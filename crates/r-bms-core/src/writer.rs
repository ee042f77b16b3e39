//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Periodic status recording into the datafile sink."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use r_bms_metrics::MonitorMetrics;
use r_bms_persistence::RecordSink;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::broker::BrokerHandle;
use crate::schedule::PeriodicSchedule;

/// Broker query source label used by the writer.
pub const RECORDER_SOURCE: &str = "recorder";

/// Wall clock used to stamp records.
pub type Clock = fn() -> NaiveDateTime;

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Periodically snapshots the broker into a [`RecordSink`].
///
/// The sink is owned by the writer task alone.
pub struct RecordWriter {
    broker: BrokerHandle,
    sink: Box<dyn RecordSink>,
    interval: Duration,
    clock: Clock,
    metrics: Option<MonitorMetrics>,
}

impl RecordWriter {
    /// Writer appending one record per `interval`, stamped with local wall-clock time.
    pub fn new(broker: BrokerHandle, sink: Box<dyn RecordSink>, interval: Duration) -> Self {
        Self {
            broker,
            sink,
            interval,
            clock: local_now,
            metrics: None,
        }
    }

    /// Replace the wall clock used for record timestamps.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Count written records in `metrics`.
    pub fn with_metrics(mut self, metrics: Option<MonitorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run until `shutdown` fires. Any query or append failure ends the task with an error.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut schedule = PeriodicSchedule::catch_up(self.interval);
        info!(
            interval_secs = self.interval.as_secs_f64(),
            "record writer started"
        );
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!("record writer shutdown signal received");
                    return Ok(());
                }
                scheduled = schedule.tick() => self.write_record(scheduled).await?,
            }
        }
    }

    /// Records are stamped with the time their tick was due, so ticks fired
    /// late in a catch-up burst keep distinct, period-spaced timestamps.
    async fn write_record(&mut self, scheduled: Instant) -> Result<()> {
        let lateness = Instant::now().saturating_duration_since(scheduled);
        let timestamp = chrono::Duration::from_std(lateness)
            .ok()
            .and_then(|lateness| (self.clock)().checked_sub_signed(lateness))
            .context("record tick lateness out of range")?;
        let status = self
            .broker
            .query(RECORDER_SOURCE)
            .await
            .context("record writer lost the status broker")?;
        let record = status.csv_record(&timestamp);
        self.sink
            .append(timestamp, &record)
            .with_context(|| format!("failed to append record stamped {timestamp}"))?;
        if let Some(metrics) = &self.metrics {
            metrics.record_written();
        }
        info!(%timestamp, soc = status.soc, voltage = status.voltage, "status record written");
        Ok(())
    }
}

impl std::fmt::Debug for RecordWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordWriter")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
