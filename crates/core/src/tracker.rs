// crates/core/src/tracker.rs
//! Progress tracking for admitted jobs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::{TrackerError, TransitionFault};
use crate::types::{JobId, JobSnapshot, JobState};

struct JobRecord {
    state: JobState,
    current: u64,
    total: u64,
    result: Option<serde_json::Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Monotonic time of the terminal transition, drives retention.
    finished_at: Option<Instant>,
}

impl JobRecord {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            state: JobState::Pending,
            current: 0,
            total: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    fn snapshot(&self, job_id: JobId) -> JobSnapshot {
        JobSnapshot {
            job_id,
            state: self.state,
            current: self.current,
            total: self.total,
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn finish(&mut self, state: JobState) {
        self.state = state;
        self.updated_at = Utc::now();
        self.finished_at = Some(Instant::now());
    }
}

/// Records and serves the progress of admitted jobs.
///
/// Every mutation runs under the record's map entry, so updates to one job are
/// serialized while different jobs never contend. Each successful mutation is
/// published on a broadcast channel for push delivery; polling via `query`
/// needs no subscriber.
pub struct JobProgressTracker {
    records: DashMap<JobId, JobRecord>,
    updates_tx: broadcast::Sender<JobSnapshot>,
}

impl JobProgressTracker {
    pub fn new() -> Self {
        let (updates_tx, _) = broadcast::channel(256);
        Self {
            records: DashMap::new(),
            updates_tx,
        }
    }

    /// Create a pending record. Repeating this while still pending is a no-op.
    pub fn initialize(&self, job_id: JobId) -> Result<(), TrackerError> {
        let snapshot = match self.records.entry(job_id) {
            Entry::Occupied(entry) => {
                if entry.get().state == JobState::Pending {
                    return Ok(());
                }
                return Err(TrackerError::AlreadyStarted(job_id));
            }
            Entry::Vacant(entry) => entry.insert(JobRecord::new()).snapshot(job_id),
        };
        tracing::debug!(job_id = %job_id, "job record initialized");
        self.publish(snapshot);
        Ok(())
    }

    /// Record progress. The first call moves the job from pending to running.
    ///
    /// `current` may never decrease and may never exceed `total`; offending
    /// calls are rejected and leave the record untouched.
    pub fn report_progress(&self, job_id: JobId, current: u64, total: u64) -> Result<(), TrackerError> {
        let snapshot = {
            let mut record = self
                .records
                .get_mut(&job_id)
                .ok_or(TrackerError::NotFound(job_id))?;

            if record.state.is_terminal() {
                return Err(TrackerError::invalid(job_id, TransitionFault::Terminal(record.state)));
            }
            if current < record.current {
                return Err(TrackerError::invalid(
                    job_id,
                    TransitionFault::ProgressRegressed {
                        previous: record.current,
                        attempted: current,
                    },
                ));
            }
            if current > total {
                return Err(TrackerError::invalid(
                    job_id,
                    TransitionFault::ExceedsTotal { current, total },
                ));
            }

            if record.state == JobState::Pending {
                tracing::debug!(job_id = %job_id, total, "job running");
            }
            record.state = JobState::Running;
            record.current = current;
            record.total = total;
            record.updated_at = Utc::now();
            record.snapshot(job_id)
        };
        self.publish(snapshot);
        Ok(())
    }

    /// Terminal success. Only a running job can complete.
    pub fn complete(&self, job_id: JobId, result: serde_json::Value) -> Result<(), TrackerError> {
        let snapshot = {
            let mut record = self
                .records
                .get_mut(&job_id)
                .ok_or(TrackerError::NotFound(job_id))?;
            match record.state {
                JobState::Running => {}
                state if state.is_terminal() => {
                    return Err(TrackerError::invalid(job_id, TransitionFault::Terminal(state)));
                }
                state => {
                    return Err(TrackerError::invalid(job_id, TransitionFault::NotRunning(state)));
                }
            }
            record.result = Some(result);
            record.finish(JobState::Succeeded);
            record.snapshot(job_id)
        };
        tracing::info!(job_id = %job_id, "job succeeded");
        self.publish(snapshot);
        Ok(())
    }

    /// Terminal failure. Allowed from pending (never started) and running.
    pub fn fail(&self, job_id: JobId, error: impl Into<String>) -> Result<(), TrackerError> {
        let error = error.into();
        let snapshot = {
            let mut record = self
                .records
                .get_mut(&job_id)
                .ok_or(TrackerError::NotFound(job_id))?;
            if record.state.is_terminal() {
                return Err(TrackerError::invalid(job_id, TransitionFault::Terminal(record.state)));
            }
            record.error = Some(error.clone());
            record.finish(JobState::Failed);
            record.snapshot(job_id)
        };
        tracing::warn!(job_id = %job_id, error = %error, "job failed");
        self.publish(snapshot);
        Ok(())
    }

    /// Read-only snapshot of one job.
    pub fn query(&self, job_id: JobId) -> Result<JobSnapshot, TrackerError> {
        self.records
            .get(&job_id)
            .map(|record| record.snapshot(job_id))
            .ok_or(TrackerError::NotFound(job_id))
    }

    /// All pending and running jobs.
    pub fn active(&self) -> Vec<JobSnapshot> {
        self.records
            .iter()
            .filter(|entry| !entry.state.is_terminal())
            .map(|entry| entry.snapshot(*entry.key()))
            .collect()
    }

    /// Subscribe to every snapshot published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<JobSnapshot> {
        self.updates_tx.subscribe()
    }

    /// Drop terminal records that finished more than `retention` ago.
    /// Returns the number removed.
    pub fn sweep(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| match record.finished_at {
            Some(finished) => now.duration_since(finished) < retention,
            None => true,
        });
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn publish(&self, snapshot: JobSnapshot) {
        // No subscribers is fine.
        let _ = self.updates_tx.send(snapshot);
    }
}

impl Default for JobProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
