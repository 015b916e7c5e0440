use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::volumes::{RemovableVolume, SupportedFilesystem, VolumeEvent, VolumeProvider};

/// Poll-and-diff volume watcher for Linux.
///
/// Reads the mount table on an interval and reports removable, writable
/// volumes carrying a supported filesystem. A couple of seconds between
/// scans is well below what a user plugging in a drive notices.
pub struct LinuxVolumeProvider {
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl LinuxVolumeProvider {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            shutdown: CancellationToken::new(),
        }
    }
}

impl VolumeProvider for LinuxVolumeProvider {
    fn start(&self, event_sender: mpsc::Sender<VolumeEvent>) {
        let interval = self.poll_interval;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut known: HashMap<String, RemovableVolume> = HashMap::new();

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let current: HashMap<String, RemovableVolume> = match list_removable_volumes() {
                    Ok(volumes) => volumes.into_iter().map(|v| (v.id.clone(), v)).collect(),
                    Err(e) => {
                        warn!(error = %e, "failed to scan mounted volumes");
                        continue;
                    }
                };

                for (id, volume) in &current {
                    if !known.contains_key(id)
                        && event_sender
                            .send(VolumeEvent::VolumeAttached(volume.clone()))
                            .await
                            .is_err()
                    {
                        return;
                    }
                }

                for id in known.keys() {
                    if !current.contains_key(id)
                        && event_sender
                            .send(VolumeEvent::VolumeDetached(id.clone()))
                            .await
                            .is_err()
                    {
                        return;
                    }
                }

                known = current;
            }
        });
    }

    fn stop(&self) {
        self.shutdown.cancel();
    }

    fn list_volumes(&self) -> Result<Vec<RemovableVolume>> {
        list_removable_volumes()
    }
}

/// Free space in bytes on the filesystem containing `path`.
pub fn free_space(path: &Path) -> Result<u64> {
    let stat = nix::sys::statvfs::statvfs(path)
        .with_context(|| format!("statvfs failed for {}", path.display()))?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

fn list_removable_volumes() -> Result<Vec<RemovableVolume>> {
    let mounts = fs::read_to_string("/proc/self/mounts").context("failed to read mount table")?;

    let volumes = parse_mount_table(&mounts)
        .into_iter()
        .filter(|entry| entry.writable)
        .filter(|entry| is_removable(&entry.device))
        .filter_map(|entry| match volume_from_mount(entry) {
            Ok(volume) => Some(volume),
            Err(e) => {
                debug!(error = %e, "skipping unreadable volume");
                None
            }
        })
        .collect();

    Ok(volumes)
}

struct MountEntry {
    device: String,
    mount_point: PathBuf,
    fstype: String,
    writable: bool,
}

fn parse_mount_table(raw: &str) -> Vec<MountEntry> {
    raw.lines().filter_map(parse_mount_line).collect()
}

/// One `/proc/self/mounts` line: device, mount point, fstype, options.
/// Keeps only real block devices on a supported filesystem.
fn parse_mount_line(line: &str) -> Option<MountEntry> {
    let mut fields = line.split_whitespace();
    let device = fields.next()?;
    let mount_point = fields.next()?;
    let fstype = fields.next()?;
    let options = fields.next()?;

    if !device.starts_with("/dev/") {
        return None;
    }
    SupportedFilesystem::from_str(fstype)?;

    Some(MountEntry {
        device: device.to_string(),
        mount_point: PathBuf::from(unescape_mount_path(mount_point)),
        fstype: fstype.to_string(),
        writable: options.split(',').any(|o| o == "rw"),
    })
}

/// `/proc` escapes separators in mount paths as octal sequences.
fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

/// A partition is removable when its parent block device says so.
fn is_removable(device: &str) -> bool {
    let Some(parent) = parent_block_device(device) else {
        return false;
    };
    matches!(
        fs::read_to_string(format!("/sys/block/{parent}/removable"))
            .as_deref()
            .map(str::trim),
        Ok("1")
    )
}

/// `sdb1` -> `sdb`, `nvme0n1p2` -> `nvme0n1`, `mmcblk0p1` -> `mmcblk0`.
fn parent_block_device(device: &str) -> Option<String> {
    let name = device.strip_prefix("/dev/")?;

    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        if let Some(idx) = name.rfind('p') {
            let suffix = &name[idx + 1..];
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                return Some(name[..idx].to_string());
            }
        }
        return Some(name.to_string());
    }

    Some(name.trim_end_matches(|c: char| c.is_ascii_digit()).to_string())
}

fn volume_from_mount(entry: MountEntry) -> Result<RemovableVolume> {
    let stat = nix::sys::statvfs::statvfs(&entry.mount_point)
        .with_context(|| format!("statvfs failed for {}", entry.mount_point.display()))?;
    let fragment = stat.fragment_size() as u64;

    let label = disk_by("label", &entry.device).unwrap_or_default();
    let id = disk_by("uuid", &entry.device)
        .unwrap_or_else(|| entry.device.trim_start_matches("/dev/").to_string());

    Ok(RemovableVolume {
        id,
        label,
        mount_point: entry.mount_point,
        capacity: stat.blocks() as u64 * fragment,
        free_space: stat.blocks_available() as u64 * fragment,
        filesystem: entry.fstype,
    })
}

/// Resolve a device through `/dev/disk/by-<kind>/` symlinks.
fn disk_by(kind: &str, device: &str) -> Option<String> {
    let target = fs::canonicalize(device).ok()?;
    let entries = fs::read_dir(format!("/dev/disk/by-{kind}")).ok()?;

    for entry in entries.flatten() {
        if let Ok(resolved) = fs::canonicalize(entry.path()) {
            if resolved == target {
                return Some(unescape_mount_path(&entry.file_name().to_string_lossy()));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_removable_style_mount_line() {
        let entry =
            parse_mount_line("/dev/sdb1 /media/user/STICK vfat rw,nosuid,nodev 0 0").unwrap();
        assert_eq!(entry.device, "/dev/sdb1");
        assert_eq!(entry.mount_point, PathBuf::from("/media/user/STICK"));
        assert_eq!(entry.fstype, "vfat");
        assert!(entry.writable);
    }

    #[test]
    fn read_only_mounts_are_flagged() {
        let entry = parse_mount_line("/dev/sdc1 /media/user/OLD ntfs ro,relatime 0 0").unwrap();
        assert!(!entry.writable);
    }

    #[test]
    fn virtual_filesystems_are_ignored() {
        assert!(parse_mount_line("proc /proc proc rw,nosuid 0 0").is_none());
        assert!(parse_mount_line("tmpfs /run tmpfs rw,nosuid 0 0").is_none());
        assert!(parse_mount_line("/dev/sda1 /boot squashfs ro 0 0").is_none());
    }

    #[test]
    fn escaped_mount_paths_are_decoded() {
        let entry =
            parse_mount_line("/dev/sdb1 /media/user/MY\\040STICK exfat rw 0 0").unwrap();
        assert_eq!(entry.mount_point, PathBuf::from("/media/user/MY STICK"));
    }

    #[test]
    fn parent_block_device_handles_common_names() {
        assert_eq!(parent_block_device("/dev/sdb1").as_deref(), Some("sdb"));
        assert_eq!(parent_block_device("/dev/sdb").as_deref(), Some("sdb"));
        assert_eq!(
            parent_block_device("/dev/nvme0n1p2").as_deref(),
            Some("nvme0n1")
        );
        assert_eq!(
            parent_block_device("/dev/mmcblk0p1").as_deref(),
            Some("mmcblk0")
        );
        assert_eq!(parent_block_device("sdb1"), None);
    }
}
