use crate::config::AppConfig;
use crate::core::ProgressTracker;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared handles threaded through the application. Cloning is cheap; all
/// members are reference-counted.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub progress: ProgressTracker,
    /// Cooperative cancellation for in-flight jobs, wired to Ctrl-C.
    pub cancel: CancellationToken,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            progress: ProgressTracker::new(),
            cancel: CancellationToken::new(),
        }
    }
}
