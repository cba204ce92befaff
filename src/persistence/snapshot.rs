use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ServiceConfig;
use crate::crisis::Dataset;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Cannot encode dataset at tick {tick}: {reason}")]
    Encode { tick: u64, reason: String },
    #[error("Cannot decode {}: {reason}", .path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("Corrupt snapshot {}: {}", .path.display(), .problems.join("; "))]
    Corrupt { path: PathBuf, problems: Vec<String> },
    #[error("No valid snapshots found. Generate a crisis with: marchgrid generate")]
    NoValidSnapshots,
}

/// Identity of a snapshot file, `crisis-tick{tick}-{saved_at}.bin`.
///
/// Orders by save time, then by tick, so the greatest name is the newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotName {
    /// Unix seconds when the file was written.
    pub saved_at: u64,
    /// Committed movement ticks in the dataset.
    pub tick: u64,
}

impl SnapshotName {
    fn now(tick: u64) -> Self {
        let saved_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        SnapshotName { saved_at, tick }
    }

    /// `None` for anything that is not a finished snapshot, including the
    /// dot-prefixed temp files a save writes first.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let (tick, saved_at) = file_name
            .strip_prefix("crisis-tick")?
            .strip_suffix(".bin")?
            .split_once('-')?;
        Some(SnapshotName {
            saved_at: saved_at.parse().ok()?,
            tick: tick.parse().ok()?,
        })
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "crisis-tick{}-{}.bin", self.tick, self.saved_at)
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotMetadata {
    pub path: PathBuf,
    pub name: SnapshotName,
    pub file_size: u64,
}

/// A directory of dataset snapshots with a retention limit.
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    root: PathBuf,
    keep: usize,
}

impl SnapshotDir {
    /// `keep` is clamped to at least one so a save never deletes itself.
    pub fn new(root: impl Into<PathBuf>, keep: usize) -> Self {
        SnapshotDir {
            root: root.into(),
            keep: keep.max(1),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(&config.snapshot_directory, config.max_snapshots as usize)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `data` named after its tick, then drop the oldest snapshots
    /// beyond the retention limit.
    ///
    /// The bytes go to a temp file that is renamed into place, so an
    /// interrupted save never leaves a half-written snapshot behind. A
    /// failed prune is logged and does not fail the save.
    pub fn save(&self, data: &Dataset) -> Result<SnapshotMetadata, SnapshotError> {
        let encoded = bincode::serialize(data).map_err(|e| SnapshotError::Encode {
            tick: data.tick_count,
            reason: e.to_string(),
        })?;

        fs::create_dir_all(&self.root)?;
        let name = SnapshotName::now(data.tick_count);
        let path = self.root.join(name.to_string());
        let tmp = self.root.join(format!(".{}.tmp", name));

        let written = fs::write(&tmp, &encoded).and_then(|_| fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        if let Err(e) = self.prune() {
            warn!(dir = %self.root.display(), error = %e, "Snapshot pruning failed");
        }

        Ok(SnapshotMetadata {
            path,
            name,
            file_size: encoded.len() as u64,
        })
    }

    /// Snapshots in this directory, newest first. A missing directory has none.
    pub fn list(&self) -> Result<Vec<SnapshotMetadata>, SnapshotError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found: Vec<SnapshotMetadata> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = SnapshotName::from_file_name(entry.file_name().to_str()?)?;
                let meta = entry.metadata().ok().filter(|m| m.is_file())?;
                Some(SnapshotMetadata {
                    path: entry.path(),
                    name,
                    file_size: meta.len(),
                })
            })
            .collect();
        found.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(found)
    }

    fn prune(&self) -> Result<usize, SnapshotError> {
        let stale = self.list()?.into_iter().skip(self.keep);
        let mut removed = 0;
        for snapshot in stale {
            fs::remove_file(&snapshot.path)?;
            debug!(path = %snapshot.path.display(), "Pruned snapshot");
            removed += 1;
        }
        Ok(removed)
    }

    /// Newest snapshot that decodes and passes [`Dataset::validate`].
    /// Older snapshots stand in for newer ones that fail either check.
    pub fn load_latest(&self) -> Result<(Dataset, SnapshotMetadata), SnapshotError> {
        for snapshot in self.list()? {
            match load_snapshot(&snapshot.path) {
                Ok(data) => return Ok((data, snapshot)),
                Err(e) => warn!(error = %e, "Skipping unusable snapshot"),
            }
        }
        Err(SnapshotError::NoValidSnapshots)
    }
}

/// Read one snapshot file. Grids whose cell count disagrees with their
/// bounds fail to decode; divisions that reference missing crises or
/// factions, stand off the map, or carry routes that do not start where
/// they stand make the snapshot corrupt.
pub fn load_snapshot(path: &Path) -> Result<Dataset, SnapshotError> {
    let bytes = fs::read(path)?;
    let data: Dataset = bincode::deserialize(&bytes).map_err(|e| SnapshotError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    data.validate().map_err(|problems| SnapshotError::Corrupt {
        path: path.to_path_buf(),
        problems,
    })?;
    Ok(data)
}
