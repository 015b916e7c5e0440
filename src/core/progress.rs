//! In-memory progress tracking for active jobs.
//!
//! Progress is updated frequently during a copy but never persisted; the
//! tracker exists so front-ends can poll a live job without touching the
//! worker thread.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Live state of a backup job, updated as the worker progresses.
#[derive(Debug, Clone)]
pub enum BackupStatus {
    Ready,
    Scanning,
    InProgress {
        total_bytes: u64,
        bytes_copied: u64,
        current_file: String,
        percentage: u8,
    },
    Complete,
    Cancelled,
    Failed(String),
}

/// Thread-safe store for the current status of active jobs, shared across
/// the application via `AppContext`.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<RwLock<HashMap<String, BackupStatus>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Update the status for a job. Called on every progress tick.
    pub async fn update(&self, job_id: &str, status: BackupStatus) {
        let mut map = self.inner.write().await;
        map.insert(job_id.to_string(), status);
    }

    pub async fn get(&self, job_id: &str) -> Option<BackupStatus> {
        let map = self.inner.read().await;
        map.get(job_id).cloned()
    }

    /// Remove a job from tracking once it has completed or failed.
    pub async fn remove(&self, job_id: &str) {
        let mut map = self.inner.write().await;
        map.remove(job_id);
    }

    pub async fn active_count(&self) -> usize {
        let map = self.inner.read().await;
        map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracker_follows_a_job_through_its_lifecycle() {
        let tracker = ProgressTracker::new();

        assert_eq!(tracker.active_count().await, 0);
        assert!(tracker.get("job-1").await.is_none());

        tracker.update("job-1", BackupStatus::Scanning).await;
        tracker
            .update(
                "job-1",
                BackupStatus::InProgress {
                    total_bytes: 1000,
                    bytes_copied: 500,
                    current_file: "a.txt".to_string(),
                    percentage: 50,
                },
            )
            .await;

        match tracker.get("job-1").await.unwrap() {
            BackupStatus::InProgress { percentage, .. } => assert_eq!(percentage, 50),
            other => panic!("expected InProgress, got {other:?}"),
        }

        tracker.update("job-1", BackupStatus::Complete).await;
        tracker.remove("job-1").await;
        assert_eq!(tracker.active_count().await, 0);
        assert!(tracker.get("job-1").await.is_none());
    }

    #[tokio::test]
    async fn tracker_holds_multiple_jobs() {
        let tracker = ProgressTracker::new();

        tracker.update("job-1", BackupStatus::Ready).await;
        tracker.update("job-2", BackupStatus::Scanning).await;
        tracker.update("job-3", BackupStatus::Complete).await;

        assert_eq!(tracker.active_count().await, 3);
        assert!(tracker.get("job-2").await.is_some());
    }
}
