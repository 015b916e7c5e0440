use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::core::error::FailureKind;

/// One user-initiated request to copy a source tree to a destination root.
/// Lives only for the duration of the run; nothing is persisted.
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub id: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl BackupJob {
    pub fn new(source: PathBuf, destination: PathBuf) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            source,
            destination,
            created_at: Utc::now(),
        }
    }
}

/// Outcome record for one copied item.
#[derive(Debug, Clone, Serialize)]
pub struct CopyResult {
    /// Path relative to the source root.
    pub item: PathBuf,
    pub status: CopyStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CopyStatus {
    Copied { bytes: u64 },
    Failed { kind: FailureKind, detail: String },
}

impl CopyResult {
    pub fn copied(item: PathBuf, bytes: u64) -> Self {
        Self {
            item,
            status: CopyStatus::Copied { bytes },
        }
    }

    pub fn failed(item: PathBuf, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            item,
            status: CopyStatus::Failed {
                kind,
                detail: detail.into(),
            },
        }
    }
}

/// End-of-job summary. Successes are counted, failures kept in full so the
/// user can see exactly which items were skipped and why.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackupReport {
    pub succeeded: u64,
    pub failed: u64,
    pub bytes_copied: u64,
    pub failures: Vec<CopyResult>,
    pub cancelled: bool,
}

impl BackupReport {
    pub fn record(&mut self, result: CopyResult) {
        match &result.status {
            CopyStatus::Copied { bytes } => {
                self.succeeded += 1;
                self.bytes_copied += bytes;
            }
            CopyStatus::Failed { .. } => {
                self.failed += 1;
                self.failures.push(result);
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}

/// A finished job together with its report, as handed back to the front-end.
#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub job: BackupJob,
    pub report: BackupReport,
}

/// Format a byte count for user-facing output.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_successes_and_failures() {
        let mut report = BackupReport::default();
        report.record(CopyResult::copied(PathBuf::from("a.txt"), 10));
        report.record(CopyResult::copied(PathBuf::from("b.txt"), 0));
        report.record(CopyResult::failed(
            PathBuf::from("c.txt"),
            FailureKind::PermissionDenied,
            "permission denied",
        ));

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.bytes_copied, 10);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn clean_report_has_no_failures() {
        let mut report = BackupReport::default();
        report.record(CopyResult::copied(PathBuf::from("a.txt"), 1));
        assert!(report.is_clean());
    }

    #[test]
    fn cancelled_report_is_not_clean() {
        let report = BackupReport {
            cancelled: true,
            ..Default::default()
        };
        assert!(!report.is_clean());
    }

    #[test]
    fn human_bytes_picks_sensible_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KiB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn jobs_get_unique_ids() {
        let a = BackupJob::new(PathBuf::from("/src"), PathBuf::from("/dst"));
        let b = BackupJob::new(PathBuf::from("/src"), PathBuf::from("/dst"));
        assert_ne!(a.id, b.id);
    }
}
