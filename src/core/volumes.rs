use std::path::PathBuf;

use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum VolumeEvent {
    VolumeAttached(RemovableVolume),
    VolumeDetached(String),
}

/// An externally attached, mounted volume eligible as a backup destination.
#[derive(Debug, Clone)]
pub struct RemovableVolume {
    /// Stable identifier, preferably the filesystem UUID.
    pub id: String,
    pub label: String,
    pub mount_point: PathBuf,
    pub capacity: u64,
    pub free_space: u64,
    pub filesystem: String,
}

impl RemovableVolume {
    /// User-friendly name for status output.
    pub fn display_name(&self) -> String {
        if self.label.is_empty() {
            format!("Drive ({})", self.mount_point.display())
        } else {
            format!("{} ({})", self.label, self.mount_point.display())
        }
    }

    pub fn capacity_gb(&self) -> f64 {
        self.capacity as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    pub fn free_gb(&self) -> f64 {
        self.free_space as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Filesystems accepted as backup destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedFilesystem {
    Ext4,
    Exfat,
    Vfat,
    Ntfs,
    Btrfs,
}

impl SupportedFilesystem {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ext4" => Some(Self::Ext4),
            "exfat" => Some(Self::Exfat),
            "vfat" | "fat32" | "fat16" => Some(Self::Vfat),
            "ntfs" | "ntfs3" => Some(Self::Ntfs),
            "btrfs" => Some(Self::Btrfs),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::Exfat => "exfat",
            Self::Vfat => "vfat",
            Self::Ntfs => "ntfs",
            Self::Btrfs => "btrfs",
        }
    }
}

pub trait VolumeProvider: Send + Sync {
    /// Start watching for attach/detach events.
    /// Spawns internal tasks that send events to the provided channel.
    fn start(&self, event_sender: mpsc::Sender<VolumeEvent>);

    /// Stop the watcher gracefully.
    fn stop(&self);

    /// List all currently mounted removable volumes. Callers treat an error
    /// as "no destinations available" rather than a fatal condition.
    fn list_volumes(&self) -> anyhow::Result<Vec<RemovableVolume>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_filesystem_parsing() {
        assert_eq!(
            SupportedFilesystem::from_str("exFAT"),
            Some(SupportedFilesystem::Exfat)
        );
        assert_eq!(
            SupportedFilesystem::from_str("FAT32"),
            Some(SupportedFilesystem::Vfat)
        );
        assert_eq!(
            SupportedFilesystem::from_str("ntfs3"),
            Some(SupportedFilesystem::Ntfs)
        );
        assert_eq!(SupportedFilesystem::from_str("squashfs"), None);
    }

    #[test]
    fn display_name_falls_back_to_mount_point() {
        let vol = RemovableVolume {
            id: "abc".into(),
            label: String::new(),
            mount_point: PathBuf::from("/media/usb0"),
            capacity: 0,
            free_space: 0,
            filesystem: "vfat".into(),
        };
        assert_eq!(vol.display_name(), "Drive (/media/usb0)");

        let labelled = RemovableVolume {
            label: "HOLIDAY PICS".into(),
            ..vol
        };
        assert_eq!(labelled.display_name(), "HOLIDAY PICS (/media/usb0)");
    }
}
