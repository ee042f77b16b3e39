//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Persistence abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::{PersistenceError, Result};

const DATE_KEY_FORMAT: &str = "%Y%m%d";

/// Delete every datafile under `root` that fell out of the retention window.
///
/// The window covers `retention_days` calendar days ending with `today`, so
/// files dated before `today - (retention_days - 1)` are removed. Every
/// regular file below `root` must be named `YYYYMMDD[.ext]`; anything else
/// aborts the sweep before a single file is deleted.
///
/// Returns the deleted paths.
pub fn sweep_expired(root: &Path, today: NaiveDate, retention_days: u32) -> Result<Vec<PathBuf>> {
    if retention_days == 0 {
        return Err(PersistenceError::InvalidRetention(retention_days));
    }
    let Some(cutoff) = today.checked_sub_days(Days::new(u64::from(retention_days - 1))) else {
        return Ok(Vec::new());
    };
    debug!(root = %root.display(), %today, %cutoff, "sweeping expired datafiles");

    let mut expired = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let dated = parse_datafile_date(entry.path())?;
        if dated < cutoff {
            debug!(path = %entry.path().display(), %dated, "datafile expired");
            expired.push(entry.into_path());
        }
    }

    for path in &expired {
        fs::remove_file(path)?;
        info!(path = %path.display(), "deleted expired datafile");
    }

    Ok(expired)
}

/// Parse the date encoded in a datafile name (`20060102.csv` -> 2006-01-02).
pub(crate) fn parse_datafile_date(path: &Path) -> Result<NaiveDate> {
    let invalid = || PersistenceError::InvalidDataFile {
        path: path.to_path_buf(),
    };
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(invalid)?;
    let basename = name.split('.').next().unwrap_or_default();
    NaiveDate::parse_from_str(basename, DATE_KEY_FORMAT).map_err(|_| invalid())
}
