use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::FailureKind;
use crate::core::models::{BackupJob, BackupReport, CopyResult};
use crate::core::progress::BackupStatus;
use crate::core::scanner::ScanResult;

/// Buffer size for file I/O (128 KiB for throughput on external media).
const BUFFER_SIZE: usize = 128 * 1024;

/// Bytes copied between progress updates.
const PROGRESS_UPDATE_INTERVAL: u64 = 1024 * 1024;

/// Sequential file copier.
///
/// One linear pass over the scanned items: directories first, then files.
/// A failing item is recorded in the report and the pass continues; nothing
/// is retried. Cancellation is checked between items, never mid-file.
pub struct CopyEngine {
    /// fsync each file after writing (safer on removable media, slower).
    pub sync_files: bool,
}

impl Default for CopyEngine {
    fn default() -> Self {
        Self { sync_files: true }
    }
}

impl CopyEngine {
    /// Copy every scanned item under `job.source` to the matching relative
    /// path below `job.destination`. Runs on the caller's thread and sends
    /// progress through `tx` with blocking sends; call it from a blocking
    /// worker, not from an async task.
    pub fn run(
        &self,
        job: &BackupJob,
        scan: &ScanResult,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<BackupStatus>,
    ) -> BackupReport {
        let mut report = BackupReport::default();

        // Enumeration failures surface in the same summary as copy failures.
        for failure in &scan.failures {
            report.record(failure.clone());
        }

        if let Err(e) = fs::create_dir_all(&job.destination) {
            warn!(destination = %job.destination.display(), error = %e, "failed to create destination root");
        }

        self.mirror_directories(job, &scan.directories, &mut report);

        let total_bytes = scan.total_bytes;
        let mut bytes_copied = 0u64;
        let mut last_update = 0u64;

        for file in &scan.files {
            if cancel.is_cancelled() {
                info!(job_id = %job.id, "cancellation requested, stopping between items");
                report.cancelled = true;
                break;
            }

            let relative = file.path.strip_prefix(&job.source).unwrap_or(&file.path);
            let dest = job.destination.join(relative);

            debug!(file = %relative.display(), size = file.size, "copying file");

            match copy_single_file(&file.path, &dest, self.sync_files) {
                Ok(written) => {
                    bytes_copied += written;
                    report.record(CopyResult::copied(relative.to_path_buf(), written));

                    if bytes_copied - last_update >= PROGRESS_UPDATE_INTERVAL
                        || bytes_copied == total_bytes
                    {
                        let percentage = if total_bytes > 0 {
                            ((bytes_copied as f64 / total_bytes as f64) * 100.0) as u8
                        } else {
                            100
                        };

                        let _ = tx.blocking_send(BackupStatus::InProgress {
                            total_bytes,
                            bytes_copied,
                            current_file: relative.to_string_lossy().to_string(),
                            percentage,
                        });

                        last_update = bytes_copied;
                    }
                }
                Err(e) => {
                    warn!(
                        file = %relative.display(),
                        error = %e.message,
                        "failed to copy file"
                    );
                    report.record(CopyResult::failed(
                        relative.to_path_buf(),
                        e.kind,
                        e.message,
                    ));
                }
            }
        }

        report
    }

    /// Recreate the scanned directory structure under the destination so
    /// empty directories survive the copy.
    fn mirror_directories(&self, job: &BackupJob, dirs: &[PathBuf], report: &mut BackupReport) {
        for dir in dirs {
            let relative = dir.strip_prefix(&job.source).unwrap_or(dir);
            let dest_dir = job.destination.join(relative);

            if let Err(e) = fs::create_dir_all(&dest_dir) {
                warn!(dir = %relative.display(), error = %e, "failed to create directory");
                report.record(CopyResult::failed(
                    relative.to_path_buf(),
                    FailureKind::from_io_error(&e),
                    e.to_string(),
                ));
            }
        }
    }
}

/// Error from one file copy attempt, already classified for the report.
#[derive(Debug)]
struct FileCopyError {
    kind: FailureKind,
    message: String,
}

fn copy_err(context: &str, e: std::io::Error) -> FileCopyError {
    FileCopyError {
        kind: FailureKind::from_io_error(&e),
        message: format!("{context}: {e}"),
    }
}

/// Copy a single file, preserving permissions and timestamps best-effort.
/// Returns the number of bytes written.
fn copy_single_file(source: &Path, dest: &Path, sync_file: bool) -> Result<u64, FileCopyError> {
    let source_metadata =
        fs::metadata(source).map_err(|e| copy_err("failed to read source metadata", e))?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| copy_err("failed to create destination directory", e))?;
    }

    let source_file = File::open(source).map_err(|e| copy_err("failed to open source file", e))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, source_file);

    let dest_file =
        File::create(dest).map_err(|e| copy_err("failed to create destination file", e))?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest_file);

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut bytes_written = 0u64;

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| copy_err("failed to read from source", e))?;

        if bytes_read == 0 {
            break;
        }

        writer
            .write_all(&buffer[..bytes_read])
            .map_err(|e| copy_err("failed to write to destination", e))?;

        bytes_written += bytes_read as u64;
    }

    writer
        .flush()
        .map_err(|e| copy_err("failed to flush destination file", e))?;

    if sync_file {
        let inner = writer
            .into_inner()
            .map_err(|e| copy_err("failed to finish destination file", e.into_error()))?;

        inner
            .sync_all()
            .map_err(|e| copy_err("failed to sync file", e))?;
    }

    // Permission and timestamp preservation may fail on FAT-family
    // filesystems; the copy itself still counts.
    let permissions = source_metadata.permissions();
    if let Err(e) = fs::set_permissions(dest, permissions) {
        debug!(dest = %dest.display(), error = %e, "failed to set file permissions");
    }

    if let Err(e) = preserve_timestamps(&source_metadata, dest) {
        debug!(dest = %dest.display(), error = %e, "failed to preserve file timestamps");
    }

    Ok(bytes_written)
}

fn preserve_timestamps(source_metadata: &fs::Metadata, dest: &Path) -> std::io::Result<()> {
    let atime = filetime::FileTime::from_last_access_time(source_metadata);
    let mtime = filetime::FileTime::from_last_modification_time(source_metadata);
    filetime::set_file_times(dest, atime, mtime)
}
