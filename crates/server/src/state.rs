// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use longrun_core::{GuardConfig, JobProgressTracker, LockStore, MemoryLockStore, SubmissionGuard};

use crate::worker::{Dispatcher, JobSettings, TokioDispatcher};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Admission control for job submissions.
    pub guard: SubmissionGuard,
    /// Progress records for admitted jobs.
    pub tracker: Arc<JobProgressTracker>,
    /// Lease and retention timings.
    pub config: GuardConfig,
    /// Execution engine for admitted jobs.
    pub dispatcher: Arc<dyn Dispatcher>,
}

impl AppState {
    /// In-memory store, jobs executed on the tokio runtime.
    pub fn new(config: GuardConfig, item_delay: Duration) -> Arc<Self> {
        Self::with_store(Arc::new(MemoryLockStore::new()), config, item_delay)
    }

    /// Use an externally provided lock store.
    pub fn with_store(store: Arc<dyn LockStore>, config: GuardConfig, item_delay: Duration) -> Arc<Self> {
        let tracker = Arc::new(JobProgressTracker::new());
        let guard = SubmissionGuard::new(store, Arc::clone(&tracker));
        let dispatcher = Arc::new(TokioDispatcher::new(
            guard.clone(),
            JobSettings::new(&config, item_delay),
        ));
        Self::from_parts(guard, config, dispatcher)
    }

    /// Assemble from a prepared guard and dispatcher (for tests and embedding).
    pub fn from_parts(guard: SubmissionGuard, config: GuardConfig, dispatcher: Arc<dyn Dispatcher>) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            tracker: Arc::clone(guard.tracker()),
            guard,
            config,
            dispatcher,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
