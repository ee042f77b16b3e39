//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Battery simulator publishing reference frames."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Battery simulator.
//!
//! Replays frames captured from a LG Resu 10 LV so the monitor can run
//! without hardware.

use std::sync::Arc;
use std::time::Duration;

use r_bms_codec::{CanFrame, MessageId};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bus::CanBus;

/// Frames captured from a LG Resu 10 LV, in wire order.
pub const REFERENCE_FRAMES: [CanFrame; 5] = [
    CanFrame::from_array(
        MessageId::VoltAmpTemp.raw(),
        [0x4b, 0x15, 0xed, 0xff, 0xba, 0x00, 0x00, 0x00],
    ),
    CanFrame::from_array(
        MessageId::SerialNum.raw(),
        [0x04, 0xc0, 0x00, 0x1f, 0x03, 0x00, 0x00, 0x00],
    ),
    CanFrame::from_array(
        MessageId::Limits.raw(),
        [0x41, 0x02, 0x96, 0x03, 0x96, 0x03, 0x00, 0x00],
    ),
    CanFrame::from_array(
        MessageId::SocSoh.raw(),
        [0x4d, 0x00, 0x63, 0x00, 0x00, 0x00, 0x00, 0x00],
    ),
    CanFrame::from_array(MessageId::WarnAlarm.raw(), [0x00; 8]),
];

/// Publishes [`REFERENCE_FRAMES`] in one burst per interval.
#[derive(Debug)]
pub struct BmsSimulator {
    bus: Arc<dyn CanBus>,
    interval: Duration,
}

impl BmsSimulator {
    pub fn new(bus: Arc<dyn CanBus>, interval: Duration) -> Self {
        Self { bus, interval }
    }

    /// Publish one burst immediately, then one per interval until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(bus = self.bus.name(), "battery simulator started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!("simulator shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    if !self.publish_burst() {
                        break;
                    }
                }
            }
        }
        info!(bus = self.bus.name(), "battery simulator stopped");
    }

    fn publish_burst(&self) -> bool {
        for frame in &REFERENCE_FRAMES {
            if let Err(err) = self.bus.publish(frame) {
                warn!(bus = self.bus.name(), error = %err, "simulator lost the bus");
                return false;
            }
            debug!(%frame, "simulated frame published");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::VirtualBus;
    use r_bms_codec::StatusSnapshot;

    #[tokio::test(start_paused = true)]
    async fn bursts_decode_to_the_reference_status() {
        let bus = Arc::new(VirtualBus::new("vcan0"));
        let mut frames = bus.subscribe();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let sim = tokio::spawn(BmsSimulator::new(bus.clone(), Duration::from_secs(1)).run(shutdown_rx));

        let mut status = StatusSnapshot::default();
        for _ in 0..REFERENCE_FRAMES.len() * 2 {
            let frame = frames.recv().await.unwrap();
            assert!(status.apply(&frame).is_some());
        }
        shutdown_tx.send(()).unwrap();
        sim.await.unwrap();

        assert_eq!((status.soc, status.soh), (77, 99));
        assert_eq!(status.max_voltage, 57.7);
        assert!(status.warnings.is_empty());
        assert!(status.alarms.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_the_bus_disconnects() {
        let bus = Arc::new(VirtualBus::new("vcan0"));
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let sim = tokio::spawn(BmsSimulator::new(bus.clone(), Duration::from_secs(1)).run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        bus.disconnect().unwrap();
        sim.await.unwrap();
    }
}
