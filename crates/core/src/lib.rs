// crates/core/src/lib.rs
//! Duplicate-submission guard and progress tracking for long-running jobs.
//!
//! Provides:
//! - `SubmissionGuard` — per-subject admission locks with lease renewal
//! - `JobProgressTracker` — monotonic job state machine with push updates
//! - `LockStore` — the atomic key-value seam the guard runs against
//! - `MemoryLockStore` — in-process `LockStore` backed by `dashmap`

pub mod config;
pub mod error;
pub mod guard;
pub mod store;
pub mod tracker;
pub mod types;

pub use config::{GuardConfig, MAX_LEASE};
pub use error::{ConfigError, GuardError, StoreError, TrackerError, TransitionFault};
pub use guard::{AdmitResult, SubmissionGuard, ORPHANED};
pub use store::{Acquire, LockStore, MemoryLockStore};
pub use tracker::JobProgressTracker;
pub use types::{JobId, JobLock, JobSnapshot, JobState, SubjectKey};
