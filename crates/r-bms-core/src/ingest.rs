//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Frame ingestion from the bus into the status broker."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use r_bms_codec::{CanFrame, StatusSnapshot};
use r_bms_metrics::MonitorMetrics;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, trace, warn};

use crate::broker::BrokerHandle;

/// Decode inbound frames into a working snapshot and publish a copy after each update.
///
/// Returns once the frame stream closes or `shutdown` fires. A stopped broker
/// is an error.
pub async fn run_ingest(
    mut frames: broadcast::Receiver<CanFrame>,
    broker: BrokerHandle,
    metrics: Option<MonitorMetrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut working = StatusSnapshot::default();
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                debug!("ingest shutdown signal received");
                return Ok(());
            }
            received = frames.recv() => match received {
                Ok(frame) => frame,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "ingest fell behind the bus, frames dropped");
                    continue;
                }
                Err(RecvError::Closed) => {
                    info!("bus frame stream closed");
                    return Ok(());
                }
            },
        };

        trace!(%frame, "frame received");
        match working.apply(&frame) {
            Some(message) => {
                if let Some(metrics) = &metrics {
                    metrics.record_frame(message.as_str());
                }
                broker
                    .publish(working.clone())
                    .await
                    .with_context(|| format!("failed to publish status after {message} frame"))?;
            }
            None => {
                debug!(id = frame.id, "ignoring frame outside the catalog");
                if let Some(metrics) = &metrics {
                    metrics.record_ignored_frame();
                }
            }
        }
    }
}
