//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Periodic keep-alive emission towards the battery."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Keep-alive generator.
//!
//! The battery keeps its output relay closed only while it keeps hearing
//! from the inverter. The generator publishes the fixed keep-alive frame on
//! every tick until it is stopped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use r_bms_codec::encode_keep_alive;
use r_bms_metrics::MonitorMetrics;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::CanBus;
use crate::schedule::PeriodicSchedule;

/// Periodic keep-alive publisher.
#[derive(Debug)]
pub struct KeepAliveGenerator {
    bus: Arc<dyn CanBus>,
    interval: Duration,
    metrics: Option<MonitorMetrics>,
}

impl KeepAliveGenerator {
    /// Generator publishing on `bus` every `interval`.
    pub fn new(bus: Arc<dyn CanBus>, interval: Duration) -> Self {
        Self {
            bus,
            interval,
            metrics: None,
        }
    }

    /// Count sent and failed keep-alives in `metrics`.
    pub fn with_metrics(mut self, metrics: Option<MonitorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Start firing. The first keep-alive goes out one interval from now.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> KeepAliveHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(stop_rx, shutdown));
        KeepAliveHandle {
            stop: Some(stop_tx),
            task,
        }
    }

    async fn run(self, mut stop: oneshot::Receiver<()>, mut shutdown: broadcast::Receiver<()>) {
        let mut schedule = PeriodicSchedule::new(self.interval);
        info!(
            bus = self.bus.name(),
            interval_secs = self.interval.as_secs_f64(),
            "keep-alive generator started"
        );
        loop {
            tokio::select! {
                biased;
                // A dropped handle stops the generator as well.
                _ = &mut stop => {
                    debug!("keep-alive stop requested");
                    break;
                }
                _ = shutdown.recv() => {
                    debug!("keep-alive shutdown signal received");
                    break;
                }
                _ = schedule.tick() => self.fire(),
            }
        }
        info!(bus = self.bus.name(), "keep-alive generator stopped");
    }

    fn fire(&self) {
        let frame = encode_keep_alive();
        let delivered = match self.bus.publish(&frame) {
            Ok(()) => {
                info!(bus = self.bus.name(), %frame, "keep-alive sent");
                true
            }
            Err(err) => {
                warn!(bus = self.bus.name(), error = %err, "keep-alive publish failed");
                false
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_keep_alive(delivered);
        }
    }
}

/// Stop handle for a running [`KeepAliveGenerator`].
#[derive(Debug)]
pub struct KeepAliveHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl KeepAliveHandle {
    /// Signal the generator to stop without waiting for it.
    pub fn request_stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Stop the generator and wait until it can no longer publish.
    pub async fn stop(mut self) -> Result<()> {
        self.request_stop();
        self.task
            .await
            .map_err(|err| anyhow!("keep-alive task join failure: {err}"))
    }
}
