//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the monitor runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the R-BMS monitor workspace.
//! This crate exposes configuration loading and tracing setup consumed by
//! the daemon and the library crates.

pub mod config;
pub mod logging;

pub use config::{
    ApiConfig, AppConfig, BusConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
    RecorderConfig, ShutdownConfig,
};
pub use logging::{init_tracing, LogFormat, LogLevel};
