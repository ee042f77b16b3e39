//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Persistence abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::metrics::PersistenceMetrics;
use crate::retention::sweep_expired;
use crate::{PersistenceError, RecordSink, Result};

/// Partition key for a timestamp (`YYYYMMDD`).
pub fn date_key(timestamp: &NaiveDateTime) -> String {
    timestamp.format("%Y%m%d").to_string()
}

struct OpenDatafile {
    key: String,
    path: PathBuf,
    writer: BufWriter<File>,
}

/// Append-only recorder writing one datafile per calendar day.
pub struct DataRecorder {
    root: PathBuf,
    extension: String,
    header: String,
    retention_days: u32,
    current: Option<OpenDatafile>,
    metrics: Option<PersistenceMetrics>,
}

impl DataRecorder {
    /// Create a recorder rooted at `root`. No file is opened until the first append.
    pub fn new(
        root: impl Into<PathBuf>,
        extension: impl Into<String>,
        retention_days: u32,
        header: impl Into<String>,
    ) -> Result<Self> {
        if retention_days == 0 {
            return Err(PersistenceError::InvalidRetention(retention_days));
        }
        Ok(Self {
            root: root.into(),
            extension: extension.into().trim_start_matches('.').to_owned(),
            header: header.into(),
            retention_days,
            current: None,
            metrics: None,
        })
    }

    /// Attach persistence metrics.
    pub fn with_metrics(mut self, metrics: PersistenceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Root directory of the datafile tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Date key of the open datafile, if any.
    pub fn current_key(&self) -> Option<&str> {
        self.current.as_ref().map(|open| open.key.as_str())
    }

    /// Path of the open datafile, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|open| open.path.as_path())
    }

    /// Path the datafile for `timestamp` lives at.
    pub fn datafile_path(&self, timestamp: &NaiveDateTime) -> PathBuf {
        self.root
            .join(timestamp.format("%Y").to_string())
            .join(timestamp.format("%m").to_string())
            .join(format!("{}.{}", date_key(timestamp), self.extension))
    }

    /// Flush and close the open datafile.
    pub fn close(&mut self) -> Result<()> {
        match self.current.take() {
            Some(open) => close_datafile(open),
            None => Ok(()),
        }
    }

    fn rotate(&self, timestamp: &NaiveDateTime, key: String) -> Result<OpenDatafile> {
        let path = self.datafile_path(timestamp);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let exists = path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        if !exists {
            writer.write_all(self.header.as_bytes())?;
            writer.flush()?;
            self.record_bytes(self.header.len());
        }
        info!(path = %path.display(), created = !exists, "rotated datafile");
        if let Some(metrics) = &self.metrics {
            metrics.record_rotation();
        }

        let expired = sweep_expired(&self.root, timestamp.date(), self.retention_days)?;
        if let Some(metrics) = &self.metrics {
            metrics.record_expired(expired.len());
        }

        Ok(OpenDatafile { key, path, writer })
    }

    fn record_bytes(&self, bytes: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.record_bytes(bytes);
        }
    }
}

impl RecordSink for DataRecorder {
    fn append(&mut self, timestamp: NaiveDateTime, record: &str) -> Result<()> {
        let key = date_key(&timestamp);
        let open = match self.current.take() {
            Some(open) if open.key == key => open,
            previous => {
                if let Some(previous) = previous {
                    close_datafile(previous)?;
                }
                self.rotate(&timestamp, key)?
            }
        };

        let open = self.current.insert(open);
        open.writer.write_all(record.as_bytes())?;
        open.writer.flush()?;
        debug!(path = %open.path.display(), bytes = record.len(), "appended record");
        self.record_bytes(record.len());
        Ok(())
    }
}

fn close_datafile(mut open: OpenDatafile) -> Result<()> {
    open.writer.flush()?;
    debug!(path = %open.path.display(), "closed datafile");
    Ok(())
}

impl std::fmt::Debug for DataRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataRecorder")
            .field("root", &self.root)
            .field("extension", &self.extension)
            .field("retention_days", &self.retention_days)
            .field("current", &self.current_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 4, 5)
            .unwrap()
    }

    #[test]
    fn date_key_is_compact() {
        assert_eq!(date_key(&at(2006, 1, 2, 15)), "20060102");
    }

    #[test]
    fn datafile_path_is_partitioned_by_year_and_month() {
        let recorder = DataRecorder::new("/data", ".csv", 7, "h\n").unwrap();
        assert_eq!(
            recorder.datafile_path(&at(2006, 1, 2, 15)),
            PathBuf::from("/data/2006/01/20060102.csv")
        );
    }

    #[test]
    fn zero_retention_is_rejected() {
        assert!(matches!(
            DataRecorder::new("/data", "csv", 0, "h\n"),
            Err(PersistenceError::InvalidRetention(0))
        ));
    }

    #[test]
    fn no_file_until_first_append() {
        let dir = tempdir().unwrap();
        let mut recorder = DataRecorder::new(dir.path(), "csv", 7, "h\n").unwrap();
        assert!(recorder.current_key().is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        recorder.append(at(2006, 1, 2, 15), "r\n").unwrap();
        assert_eq!(recorder.current_key(), Some("20060102"));
        assert!(recorder.current_path().unwrap().exists());
    }
}
