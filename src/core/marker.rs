use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Name of the state file kept at the root of every adopted backup drive.
pub const MARKER_FILENAME: &str = ".ebk-drive.json";

/// Drive-resident backup record. This is the only state the tool keeps, and
/// it lives on the drive itself so the application stays stateless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveMarker {
    pub drive_id: String,
    pub last_backup: Option<DateTime<Local>>,
    pub backup_count: u32,
}

impl DriveMarker {
    pub fn new(drive_id: impl Into<String>) -> Self {
        Self {
            drive_id: drive_id.into(),
            last_backup: None,
            backup_count: 0,
        }
    }

    pub fn path_for(mount: &Path) -> PathBuf {
        mount.join(MARKER_FILENAME)
    }

    pub fn exists(mount: &Path) -> bool {
        Self::path_for(mount).exists()
    }

    /// Load the marker from a mounted volume. Returns `None` when absent;
    /// an unparseable marker is treated as absent with a warning so a
    /// corrupted file never wedges the watch loop.
    pub fn load(mount: &Path) -> Result<Option<Self>> {
        let path = Self::path_for(mount);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        match serde_json::from_str(&raw) {
            Ok(marker) => Ok(Some(marker)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "drive marker unreadable, ignoring");
                Ok(None)
            }
        }
    }

    pub fn save(&self, mount: &Path) -> Result<()> {
        let path = Self::path_for(mount);
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(&path, raw).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Write a fresh marker, adopting the drive as a backup target.
    pub fn initialize(mount: &Path, drive_id: &str) -> Result<Self> {
        let marker = Self::new(drive_id);
        marker.save(mount)?;
        Ok(marker)
    }

    /// Record that a backup completed just now.
    pub fn record_backup(&mut self, mount: &Path) -> Result<()> {
        self.last_backup = Some(Local::now());
        self.backup_count += 1;
        self.save(mount)
    }

    pub fn backed_up_today(&self) -> bool {
        self.last_backup
            .map(|t| t.date_naive() == Local::now().date_naive())
            .unwrap_or(false)
    }
}
