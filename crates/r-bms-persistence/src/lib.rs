//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Persistence abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Datafile persistence for the battery monitor.
//!
//! Records are appended to one file per calendar day laid out as
//!
//! ```text
//! <root>/<YYYY>/<MM>/<YYYYMMDD>.<ext>
//! ```
//!
//! The first line of every file is a header describing the columns. Files
//! older than the retention period are deleted whenever the recorder rotates
//! to a new day, so the tree holds a bounded number of files.
#![warn(missing_docs)]

use std::path::PathBuf;

use chrono::NaiveDateTime;

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
///
/// Every variant is fatal for the recorder: the datafile tree is no longer
/// known to be consistent once one of these is raised.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing datafiles.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Failure while walking the datafile tree.
    #[error("datafile tree walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    /// A file under the recorder root does not carry a `YYYYMMDD` name.
    #[error("datafile {} does not carry a YYYYMMDD name", path.display())]
    InvalidDataFile {
        /// Offending path.
        path: PathBuf,
    },
    /// Retention must keep at least the current day.
    #[error("retention period must be at least one day, got {0}")]
    InvalidRetention(u32),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Destination for timestamped records.
///
/// [`DataRecorder`] is the production implementation; the periodic writer
/// only depends on this trait.
pub trait RecordSink: Send {
    /// Append `record` to the partition selected by `timestamp`.
    fn append(&mut self, timestamp: NaiveDateTime, record: &str) -> Result<()>;
}

pub mod metrics;
pub mod recorder;
pub mod retention;

pub use metrics::PersistenceMetrics;
pub use recorder::{date_key, DataRecorder};
pub use retention::sweep_expired;
