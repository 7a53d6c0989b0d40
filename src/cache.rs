//! # Snapshot Cache
//!
//! Persists the latest [`SensorSnapshot`] as JSON so a restart can show the
//! last known values immediately and seed the air-reading hold.
//!
//! ## Caching Strategy
//! - **Location**: `/tmp/greenhouse_snapshot.json` by default (cleared on reboot)
//! - **TTL**: 30 minutes by default, checked against the file modification time
//! - **Writes**: every `save_interval_secs`, not every collection round, to
//!   spare the SD card
//!
//! A stale or corrupt cache is never fatal; the collector simply starts from
//! an empty snapshot.
//!
//! ## History
//! [`HistoryLog`] keeps every saved snapshot, one JSON object per line, so
//! the readings of the last hours can be queried after a restart.

use crate::SensorSnapshot;
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use std::{fs, io};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache file operations failed (missing, permissions, disk space)
    #[error("cache IO: {0}")]
    Io(#[from] io::Error),

    /// Cache content is not a valid snapshot
    #[error("cache content invalid: {0}")]
    Json(#[from] serde_json::Error),

    /// Cache is older than its TTL
    #[error("cache is stale ({age_secs}s old)")]
    Stale { age_secs: u64 },
}

/// JSON file holding the last saved snapshot.
#[derive(Clone, Debug)]
pub struct SnapshotCache {
    path: PathBuf,
    ttl: Duration,
}

impl SnapshotCache {
    pub fn new<P: Into<PathBuf>>(path: P, ttl: Duration) -> Self {
        SnapshotCache {
            path: path.into(),
            ttl,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached snapshot if it is younger than the TTL.
    pub fn load(&self) -> Result<SensorSnapshot, CacheError> {
        let meta = fs::metadata(&self.path)?;
        let age = SystemTime::now()
            .duration_since(meta.modified()?)
            .unwrap_or(Duration::ZERO);

        if age > self.ttl {
            return Err(CacheError::Stale {
                age_secs: age.as_secs(),
            });
        }

        let data = fs::read(&self.path)?;
        let snapshot = serde_json::from_slice(&data)?;
        debug!(path = %self.path.display(), "loaded cached snapshot");
        Ok(snapshot)
    }

    pub fn save(&self, snapshot: &SensorSnapshot) -> Result<(), CacheError> {
        let data = serde_json::to_vec(snapshot)?;
        fs::write(&self.path, data)?;
        debug!(path = %self.path.display(), "snapshot cached");
        Ok(())
    }
}

/// Append-only JSON lines file of saved snapshots.
#[derive(Clone, Debug)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        HistoryLog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one snapshot, creating the file and its directory if needed.
    pub fn append(&self, snapshot: &SensorSnapshot) -> Result<(), CacheError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut line = serde_json::to_vec(snapshot)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        debug!(path = %self.path.display(), "snapshot appended to history");
        Ok(())
    }

    /// Snapshots taken at or after `since`, oldest first.
    ///
    /// A missing file is an empty history. Lines that do not parse (a write
    /// cut short by power loss) are skipped.
    pub fn history(&self, since: DateTime<Utc>) -> Result<Vec<SensorSnapshot>, CacheError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SensorSnapshot>(&line) {
                Ok(snapshot) if snapshot.timestamp >= since => snapshots.push(snapshot),
                Ok(_) => {}
                Err(e) => warn!(line = index + 1, error = %e, "skipping unreadable history line"),
            }
        }
        Ok(snapshots)
    }
}
