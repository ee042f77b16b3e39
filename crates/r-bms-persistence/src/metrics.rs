//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Persistence abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{IntCounter, Opts, Registry};

use crate::Result;

/// Metrics published by the datafile recorder.
#[derive(Clone)]
pub struct PersistenceMetrics {
    rotations: IntCounter,
    expired: IntCounter,
    bytes: IntCounter,
}

impl PersistenceMetrics {
    /// Register all persistence metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let rotations = IntCounter::with_opts(Opts::new(
            "r_bms_datafiles_rotated_total",
            "Total number of times the recorder switched to a new datafile",
        ))?;
        registry.register(Box::new(rotations.clone()))?;

        let expired = IntCounter::with_opts(Opts::new(
            "r_bms_datafiles_expired_total",
            "Total number of datafiles deleted by the retention sweep",
        ))?;
        registry.register(Box::new(expired.clone()))?;

        let bytes = IntCounter::with_opts(Opts::new(
            "r_bms_datafile_bytes_total",
            "Total bytes appended to datafiles, headers included",
        ))?;
        registry.register(Box::new(bytes.clone()))?;

        Ok(Self {
            rotations,
            expired,
            bytes,
        })
    }

    /// Record a rotation to a new datafile.
    pub fn record_rotation(&self) {
        self.rotations.inc();
    }

    /// Record files removed by a retention sweep.
    pub fn record_expired(&self, count: usize) {
        self.expired.inc_by(count as u64);
    }

    /// Add to the number of bytes written.
    pub fn record_bytes(&self, bytes: usize) {
        self.bytes.inc_by(bytes as u64);
    }
}

impl std::fmt::Debug for PersistenceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_registered() {
        let registry = Arc::new(Registry::new());
        let metrics = PersistenceMetrics::new(registry.clone()).unwrap();
        metrics.record_rotation();
        metrics.record_expired(2);
        metrics.record_bytes(42);
        let names: Vec<_> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        assert!(names.contains(&"r_bms_datafiles_rotated_total".to_owned()));
        assert!(names.contains(&"r_bms_datafiles_expired_total".to_owned()));
        assert!(names.contains(&"r_bms_datafile_bytes_total".to_owned()));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = Arc::new(Registry::new());
        PersistenceMetrics::new(registry.clone()).unwrap();
        assert!(PersistenceMetrics::new(registry).is_err());
    }
}
