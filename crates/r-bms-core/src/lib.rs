//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary monitor lifecycle management."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Core runtime for R-BMS: bus plumbing, status broker, periodic tasks and
//! the monitor lifecycle.

pub mod broker;
pub mod bus;
pub mod ingest;
pub mod keepalive;
pub mod monitor;
pub mod schedule;
pub mod shutdown;
#[cfg(feature = "simulation")]
pub mod sim;
#[cfg(feature = "socketcan")]
pub mod socket_bus;
pub mod writer;

pub use broker::{BrokerError, BrokerHandle, StatusBroker};
pub use bus::{open_bus, BusError, BusKind, CanBus, VirtualBus};
pub use keepalive::{KeepAliveGenerator, KeepAliveHandle};
pub use monitor::{Monitor, MonitorHandle, MonitorSettings};
pub use shutdown::TerminationCoordinator;
#[cfg(feature = "simulation")]
pub use sim::{BmsSimulator, REFERENCE_FRAMES};
#[cfg(feature = "socketcan")]
pub use socket_bus::SocketCanBus;
pub use writer::RecordWriter;
