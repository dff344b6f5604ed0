// crates/server/src/worker.rs
//! Item-processing jobs and the dispatcher that hands them to the runtime.

use std::time::Duration;

use async_trait::async_trait;
use longrun_core::{GuardConfig, GuardError, JobId, JobState, SubmissionGuard, TrackerError};
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::metrics::{record_job_finished, record_job_started};

/// Timings a running job needs.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub lease: Duration,
    pub heartbeat: Duration,
    pub item_delay: Duration,
}

impl JobSettings {
    pub fn new(guard: &GuardConfig, item_delay: Duration) -> Self {
        Self {
            lease: guard.lease,
            heartbeat: guard.heartbeat,
            item_delay,
        }
    }
}

/// Why a job stopped before completing.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("lease expired")]
    LeaseLost,

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Failure reason recorded when a job task panics or is cancelled.
pub const WORKER_CRASHED: &str = "worker crashed";

/// A loop over submitted items, reporting progress after each one.
#[derive(Debug, Clone)]
pub struct ItemJob {
    pub job_id: JobId,
    pub items: Vec<serde_json::Number>,
}

impl ItemJob {
    pub fn new(job_id: JobId, items: Vec<serde_json::Number>) -> Self {
        Self { job_id, items }
    }

    /// Execute to a terminal state and release the admission lock.
    pub async fn run(self, guard: SubmissionGuard, settings: JobSettings) -> JobState {
        let job_id = self.job_id;
        tracing::info!(job_id = %job_id, items = self.items.len(), "job started");

        let state = match self.execute(&guard, &settings).await {
            Ok(result) => match guard.tracker().complete(job_id, result) {
                Ok(()) => JobState::Succeeded,
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "completion rejected");
                    fail_record(&guard, job_id, &e.to_string())
                }
            },
            Err(JobFailure::Tracker(e)) => {
                tracing::error!(job_id = %job_id, error = %e, "progress report rejected, aborting job");
                fail_record(&guard, job_id, &e.to_string())
            }
            Err(e) => fail_record(&guard, job_id, &e.to_string()),
        };

        release_lock(&guard, job_id).await;
        state
    }

    async fn execute(&self, guard: &SubmissionGuard, settings: &JobSettings) -> Result<serde_json::Value, JobFailure> {
        let tracker = guard.tracker();
        let total = self.items.len() as u64;
        tracker.report_progress(self.job_id, 0, total)?;

        let mut heartbeat = tokio::time::interval_at(Instant::now() + settings.heartbeat, settings.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for (index, item) in self.items.iter().enumerate() {
            let work = tokio::time::sleep(settings.item_delay);
            tokio::pin!(work);
            loop {
                tokio::select! {
                    _ = &mut work => break,
                    _ = heartbeat.tick() => match guard.renew(self.job_id, settings.lease).await {
                        Ok(()) => {}
                        Err(GuardError::NotFound(_)) => return Err(JobFailure::LeaseLost),
                        Err(e) => tracing::warn!(job_id = %self.job_id, error = %e, "heartbeat failed"),
                    },
                }
            }
            tracing::trace!(job_id = %self.job_id, item = %item, "item processed");
            tracker.report_progress(self.job_id, index as u64 + 1, total)?;
        }

        Ok(json!({ "message": "Task completed", "totalItems": total }))
    }
}

/// Await a job task and settle its record and lock if it never did.
///
/// A panicked or aborted task skips its own `fail` and `release`; the
/// supervisor records the failure and frees the subject instead of waiting
/// for the lease to lapse.
pub async fn supervise(guard: SubmissionGuard, job_id: JobId, handle: JoinHandle<JobState>) -> JobState {
    let started = std::time::Instant::now();
    record_job_started();

    let state = match handle.await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "job task crashed");
            let state = fail_record(&guard, job_id, WORKER_CRASHED);
            release_lock(&guard, job_id).await;
            state
        }
    };

    record_job_finished(state.as_str(), started.elapsed());
    state
}

async fn release_lock(guard: &SubmissionGuard, job_id: JobId) {
    match guard.release(job_id).await {
        Ok(()) => {}
        Err(GuardError::NotFound(_)) => {
            tracing::debug!(job_id = %job_id, "lock already gone at release");
        }
        Err(e) => tracing::warn!(job_id = %job_id, error = %e, "release failed, relying on lease expiry"),
    }
}

fn fail_record(guard: &SubmissionGuard, job_id: JobId, reason: &str) -> JobState {
    if let Err(e) = guard.tracker().fail(job_id, reason) {
        tracing::error!(job_id = %job_id, error = %e, "could not record failure");
    }
    guard
        .tracker()
        .query(job_id)
        .map(|snap| snap.state)
        .unwrap_or(JobState::Failed)
}

#[derive(Debug, Error)]
#[error("dispatch failed: {0}")]
pub struct DispatchError(pub String);

/// Hands admitted jobs to an execution engine.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, job: ItemJob) -> Result<(), DispatchError>;
}

/// Runs each job as a task on the current tokio runtime, under a supervisor
/// that cleans up after crashes.
pub struct TokioDispatcher {
    guard: SubmissionGuard,
    settings: JobSettings,
}

impl TokioDispatcher {
    pub fn new(guard: SubmissionGuard, settings: JobSettings) -> Self {
        Self { guard, settings }
    }
}

#[async_trait]
impl Dispatcher for TokioDispatcher {
    async fn dispatch(&self, job: ItemJob) -> Result<(), DispatchError> {
        let job_id = job.job_id;
        let handle = tokio::spawn(job.run(self.guard.clone(), self.settings.clone()));
        tokio::spawn(supervise(self.guard.clone(), job_id, handle));
        Ok(())
    }
}
