use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::adapters;
use crate::context::AppContext;
use crate::core::copier::CopyEngine;
use crate::core::error::BackupError;
use crate::core::marker::DriveMarker;
use crate::core::models::{BackupJob, BackupReport, CompletedJob, CopyStatus};
use crate::core::progress::BackupStatus;
use crate::core::scanner::{self, ExcludeRules};
use crate::core::volumes::{RemovableVolume, VolumeEvent, VolumeProvider};
use crate::logging::LogThrottle;

pub struct Orchestrator {
    ctx: AppContext,
    provider: Box<dyn VolumeProvider>,
}

impl Orchestrator {
    pub fn new(ctx: AppContext, provider: Box<dyn VolumeProvider>) -> Self {
        Self { ctx, provider }
    }

    /// Wait for removable drives and back up onto recognized ones.
    /// Runs until cancelled.
    pub async fn watch(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(32);
        self.provider.start(tx);

        // Drives attached before startup count too.
        let initial = self.provider.list_volumes().unwrap_or_else(|e| {
            warn!(error = %e, "could not list volumes");
            Vec::new()
        });
        for volume in initial {
            self.handle_attached(volume).await;
        }

        info!("waiting for a removable drive");
        loop {
            tokio::select! {
                _ = self.ctx.cancel.cancelled() => {
                    info!("shutting down");
                    self.provider.stop();
                    break;
                }
                event = rx.recv() => match event {
                    Some(VolumeEvent::VolumeAttached(volume)) => {
                        info!(volume = %volume.display_name(), "drive attached");
                        self.handle_attached(volume).await;
                    }
                    Some(VolumeEvent::VolumeDetached(id)) => {
                        info!(id = %id, "drive detached");
                    }
                    None => break,
                },
            }
        }

        Ok(())
    }

    async fn handle_attached(&self, volume: RemovableVolume) {
        match DriveMarker::load(&volume.mount_point) {
            Ok(Some(marker)) if marker.backed_up_today() => {
                info!(volume = %volume.display_name(), "already backed up today, nothing to do");
            }
            Ok(Some(_)) => {
                if let Err(e) = self.backup_to_volume(&volume).await {
                    error!(volume = %volume.display_name(), error = %e, "backup failed");
                }
            }
            Ok(None) => {
                if self.ctx.config.adopt_new_drives {
                    info!(volume = %volume.display_name(), "adopting new drive");
                    if let Err(e) = self.backup_to_volume(&volume).await {
                        error!(volume = %volume.display_name(), error = %e, "backup failed");
                    }
                } else {
                    info!(
                        volume = %volume.display_name(),
                        "unrecognized drive attached; run `ebk backup` to use it"
                    );
                }
            }
            Err(e) => {
                warn!(volume = %volume.display_name(), error = %e, "could not read drive marker");
            }
        }
    }

    /// Back up onto a detected volume, updating its marker afterwards.
    pub async fn backup_to_volume(&self, volume: &RemovableVolume) -> Result<CompletedJob> {
        let completed = self.backup_to_root(&volume.mount_point).await?;

        if !completed.report.cancelled {
            let mut marker = match DriveMarker::load(&volume.mount_point)? {
                Some(marker) => marker,
                None => DriveMarker::new(volume.id.clone()),
            };
            if let Err(e) = marker.record_backup(&volume.mount_point) {
                warn!(error = %e, "could not update drive marker");
            }
        }

        Ok(completed)
    }

    /// Back up under an arbitrary destination root; the dated job directory
    /// is created beneath it. Used for explicit `--destination` runs.
    pub async fn backup_to_root(&self, root: &Path) -> Result<CompletedJob> {
        let destination = next_backup_dir(root)?;
        let free = adapters::free_space(root).unwrap_or_else(|e| {
            warn!(error = %e, "could not query free space, skipping the pre-check");
            u64::MAX
        });
        self.execute(destination, free).await
    }

    async fn execute(&self, destination: PathBuf, free_space: u64) -> Result<CompletedJob> {
        let config = Arc::clone(&self.ctx.config);
        let job = BackupJob::new(config.source_directory.clone(), destination);

        info!(
            job_id = %job.id,
            source = %job.source.display(),
            destination = %job.destination.display(),
            "starting backup job"
        );

        let (tx, mut rx) = mpsc::channel(64);
        self.ctx.progress.update(&job.id, BackupStatus::Ready).await;

        // Progress flows from the worker into the tracker, with throttled
        // log lines so large jobs don't flood the output.
        let forwarder = {
            let progress = self.ctx.progress.clone();
            let job_id = job.id.clone();
            tokio::spawn(async move {
                let throttle = LogThrottle::new(Duration::from_millis(500));
                while let Some(status) = rx.recv().await {
                    if let BackupStatus::InProgress {
                        percentage,
                        current_file,
                        ..
                    } = &status
                    {
                        if throttle.should_log() {
                            debug!(percentage, file = %current_file, "copy progress");
                        }
                    }
                    progress.update(&job_id, status).await;
                }
            })
        };

        let cancel = self.ctx.cancel.clone();
        let worker_job = job.clone();
        let worker_config = Arc::clone(&config);
        let outcome = tokio::task::spawn_blocking(move || -> Result<BackupReport, BackupError> {
            let _ = tx.blocking_send(BackupStatus::Scanning);

            let rules = ExcludeRules::from_config(&worker_config.exclude_patterns)?;
            let scan = scanner::scan(
                &worker_job.source,
                &worker_config.folders,
                &rules,
                &cancel,
            )?;

            let margin = worker_config.space_margin_mb.saturating_mul(1024 * 1024);
            let needed = scan.total_bytes.saturating_add(margin);
            if needed > free_space {
                return Err(BackupError::InsufficientSpace {
                    needed,
                    available: free_space,
                });
            }

            let engine = CopyEngine {
                sync_files: worker_config.sync_files,
            };
            Ok(engine.run(&worker_job, &scan, &cancel, &tx))
        })
        .await
        .context("backup worker panicked")?;

        let _ = forwarder.await;

        match outcome {
            Ok(report) => {
                let status = if report.cancelled {
                    BackupStatus::Cancelled
                } else {
                    BackupStatus::Complete
                };
                self.ctx.progress.update(&job.id, status).await;
                self.ctx.progress.remove(&job.id).await;

                log_report(&job, &report);
                Ok(CompletedJob { job, report })
            }
            Err(e) => {
                self.ctx
                    .progress
                    .update(&job.id, BackupStatus::Failed(e.to_string()))
                    .await;
                self.ctx.progress.remove(&job.id).await;
                Err(e.into())
            }
        }
    }
}

fn log_report(job: &BackupJob, report: &BackupReport) {
    info!(
        job_id = %job.id,
        succeeded = report.succeeded,
        failed = report.failed,
        bytes = report.bytes_copied,
        cancelled = report.cancelled,
        "backup finished"
    );

    if !report.failures.is_empty() {
        let mut summary = format!("{} item(s) could not be copied:", report.failures.len());
        for failure in report.failures.iter().take(10) {
            if let CopyStatus::Failed { kind, detail } = &failure.status {
                summary.push_str(&format!(
                    "\n  - {}: {} ({})",
                    failure.item.display(),
                    kind,
                    detail
                ));
            }
        }
        if report.failures.len() > 10 {
            summary.push_str(&format!("\n  ... and {} more", report.failures.len() - 10));
        }
        warn!("{summary}");
    }
}

/// Pick `backups/backup-YYYY-MM-DD-N` under the destination root, where N is
/// the first free increment for the day. Creating `backups/` doubles as the
/// writability probe required before a job may start.
pub fn next_backup_dir(root: &Path) -> Result<PathBuf, BackupError> {
    let backups = root.join("backups");
    fs::create_dir_all(&backups).map_err(|source| BackupError::DestinationUnwritable {
        path: backups.clone(),
        source,
    })?;

    let base = format!("backup-{}", Local::now().format("%Y-%m-%d"));
    let mut increment = 1u32;
    loop {
        let candidate = backups.join(format!("{base}-{increment}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
        increment += 1;
    }
}
