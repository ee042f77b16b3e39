//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transport implementations for the battery bus."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Bus transport seam.
//!
//! The monitor only talks to the battery through [`CanBus`]. Kernel CAN
//! interfaces (`can0`, `vcan0`, ...) are bound through SocketCAN when the
//! `socketcan` feature is enabled; `virtual*` names get [`VirtualBus`], an
//! in-process loopback used for simulation and tests.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use r_bms_codec::CanFrame;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

const VIRTUAL_BUS_CAPACITY: usize = 256;

/// Errors reported by bus transports.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The transport was disconnected and no longer carries frames.
    #[error("bus {interface} is disconnected")]
    Disconnected {
        /// Interface name.
        interface: String,
    },
    /// The transport refused an outbound frame.
    #[error("failed to publish on bus {interface}: {reason}")]
    Publish {
        /// Interface name.
        interface: String,
        /// Transport specific failure description.
        reason: String,
    },
    /// The interface could not be opened.
    #[error("failed to open CAN interface {interface}")]
    Open {
        /// Interface name.
        interface: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
    /// No transport is available for the requested interface name.
    #[error("no bus transport available for interface {0:?}")]
    UnsupportedInterface(String),
}

/// Transport family selected for an interface name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    /// In-process [`VirtualBus`].
    Virtual,
    /// Kernel CAN interface bound through SocketCAN.
    SocketCan,
}

impl BusKind {
    /// Classify `interface`. Empty names have no transport.
    pub fn for_interface(interface: &str) -> Option<Self> {
        let interface = interface.trim();
        if interface.is_empty() {
            None
        } else if interface.starts_with("virtual") {
            Some(BusKind::Virtual)
        } else {
            Some(BusKind::SocketCan)
        }
    }
}

/// Frame transport connecting the monitor to the battery.
pub trait CanBus: Send + Sync + fmt::Debug {
    /// Interface name the transport is bound to.
    fn name(&self) -> &str;

    /// Stream of inbound frames. The stream ends once the bus disconnects.
    fn subscribe(&self) -> broadcast::Receiver<CanFrame>;

    /// Submit an outbound frame.
    fn publish(&self, frame: &CanFrame) -> Result<(), BusError>;

    /// Release the transport. Publishing afterwards fails.
    fn disconnect(&self) -> Result<(), BusError>;
}

/// In-process loopback bus.
///
/// Every published frame is delivered to every subscriber, the publisher's
/// own subscriptions included.
#[derive(Debug)]
pub struct VirtualBus {
    name: String,
    sender: Mutex<Option<broadcast::Sender<CanFrame>>>,
}

impl VirtualBus {
    /// Connected loopback bus named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(VIRTUAL_BUS_CAPACITY);
        Self {
            name: name.into(),
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Whether [`CanBus::disconnect`] has not been called yet.
    pub fn is_connected(&self) -> bool {
        self.sender.lock().is_some()
    }

    fn disconnected(&self) -> BusError {
        BusError::Disconnected {
            interface: self.name.clone(),
        }
    }
}

impl CanBus for VirtualBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self) -> broadcast::Receiver<CanFrame> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.subscribe(),
            // Sender dropped immediately so the receiver reports a closed stream.
            None => broadcast::channel(1).1,
        }
    }

    fn publish(&self, frame: &CanFrame) -> Result<(), BusError> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or_else(|| self.disconnected())?;
        match sender.send(*frame) {
            Ok(receivers) => trace!(bus = %self.name, %frame, receivers, "frame published"),
            Err(_) => trace!(bus = %self.name, %frame, "frame published without listeners"),
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BusError> {
        match self.sender.lock().take() {
            Some(_) => {
                info!(bus = %self.name, "bus disconnected");
                Ok(())
            }
            None => Err(self.disconnected()),
        }
    }
}

/// Bind the transport for `interface`.
///
/// `virtual*` names map to a [`VirtualBus`]. Every other name is opened as a
/// kernel CAN interface, which needs the `socketcan` feature and a running
/// tokio runtime.
pub fn open_bus(interface: &str) -> Result<Arc<dyn CanBus>, BusError> {
    match BusKind::for_interface(interface) {
        Some(BusKind::Virtual) => {
            debug!(interface, "binding virtual bus");
            Ok(Arc::new(VirtualBus::new(interface)))
        }
        #[cfg(feature = "socketcan")]
        Some(BusKind::SocketCan) => {
            debug!(interface, "binding socketcan interface");
            Ok(Arc::new(crate::socket_bus::SocketCanBus::open(interface)?))
        }
        _ => Err(BusError::UnsupportedInterface(interface.to_owned())),
    }
}
