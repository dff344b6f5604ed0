// crates/core/src/error.rs
use std::time::Duration;

use thiserror::Error;

use crate::config::MAX_LEASE;
use crate::types::{JobId, JobState};

/// Failure of the backing lock store itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Lock store unavailable: {0}")]
    Unavailable(String),

    #[error("Lease of {0:?} overflows the lock clock")]
    LeaseOverflow(Duration),
}

/// Errors returned by the submission guard.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Subject key must not be empty")]
    InvalidSubject,

    #[error("Lease duration must be greater than zero and at most {}s", MAX_LEASE.as_secs())]
    InvalidLease,

    #[error("No live lock for job {0}")]
    NotFound(JobId),

    /// Admission cannot be decided. Callers must reject the request.
    #[error("Submission guard unavailable: {0}")]
    Unavailable(#[source] StoreError),
}

impl From<StoreError> for GuardError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LeaseOverflow(_) => GuardError::InvalidLease,
            other => GuardError::Unavailable(other),
        }
    }
}

/// Rejected guard timings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("lease must be greater than zero")]
    ZeroLease,

    #[error("heartbeat must be greater than zero")]
    ZeroHeartbeat,

    #[error("lease ({lease:?}) exceeds the maximum of {max:?}")]
    LeaseTooLong { lease: Duration, max: Duration },

    #[error("heartbeat ({heartbeat:?}) must be shorter than lease ({lease:?})")]
    HeartbeatNotShorter { heartbeat: Duration, lease: Duration },
}

/// Why a tracker mutation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionFault {
    /// The record already reached a terminal state.
    Terminal(JobState),
    /// `complete` needs a running record.
    NotRunning(JobState),
    ProgressRegressed { previous: u64, attempted: u64 },
    ExceedsTotal { current: u64, total: u64 },
}

impl std::fmt::Display for TransitionFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionFault::Terminal(state) => write!(f, "record is already {state}"),
            TransitionFault::NotRunning(state) => write!(f, "record is {state}, not running"),
            TransitionFault::ProgressRegressed { previous, attempted } => {
                write!(f, "progress regressed from {previous} to {attempted}")
            }
            TransitionFault::ExceedsTotal { current, total } => {
                write!(f, "progress {current} exceeds total {total}")
            }
        }
    }
}

/// Errors returned by the progress tracker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already started: {0}")]
    AlreadyStarted(JobId),

    /// Producer bug: the executing job must treat this as fatal.
    #[error("Invalid transition for job {job_id}: {fault}")]
    InvalidTransition { job_id: JobId, fault: TransitionFault },
}

impl TrackerError {
    pub fn invalid(job_id: JobId, fault: TransitionFault) -> Self {
        Self::InvalidTransition { job_id, fault }
    }
}
