// crates/core/src/store.rs
//! LockStore trait: the atomic key-value primitive behind admission locks.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::types::{JobId, JobLock, SubjectKey};

/// Outcome of a conditional create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquire {
    /// No live lock existed; this one was created.
    Acquired(JobLock),
    /// A live lock already holds the subject.
    Held(JobLock),
}

/// Backing store for admission locks.
///
/// Implementations must make `acquire` and `extend` single atomic steps per
/// key (e.g. `SET NX PX` and a compare-and-extend script on Redis). An expired
/// lock is indistinguishable from an absent one for every operation.
///
/// Implementations include:
/// - `MemoryLockStore` — in-process, `dashmap` entry locking
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Create a lock for `subject` unless a live one exists.
    async fn acquire(
        &self,
        subject: &SubjectKey,
        job_id: JobId,
        ttl: Duration,
    ) -> Result<Acquire, StoreError>;

    /// Push `expires_at` to `now + ttl` if `job_id` still owns a live lock.
    async fn extend(&self, job_id: JobId, ttl: Duration) -> Result<Option<JobLock>, StoreError>;

    /// Delete the lock owned by `job_id`. Returns false if there was no live lock.
    async fn remove(&self, job_id: JobId) -> Result<bool, StoreError>;

    /// Live lock owned by `job_id`, if any.
    async fn lookup(&self, job_id: JobId) -> Result<Option<JobLock>, StoreError>;

    /// Live lock currently holding `subject`, if any.
    async fn get(&self, subject: &SubjectKey) -> Result<Option<JobLock>, StoreError>;

    /// Drop expired entries. Housekeeping only; expiry is enforced on lookup.
    async fn purge_expired(&self) -> Result<usize, StoreError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// In-process lock store.
///
/// `locks` is keyed by subject; `owners` maps a job id back to its subject so
/// heartbeats and releases can address a lock by job id alone. The owner
/// index is never held while a `locks` shard is being acquired.
#[derive(Default)]
pub struct MemoryLockStore {
    locks: DashMap<SubjectKey, JobLock>,
    owners: DashMap<JobId, SubjectKey>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, expired or not.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn subject_of(&self, job_id: &JobId) -> Option<SubjectKey> {
        self.owners.get(job_id).map(|s| s.value().clone())
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire(
        &self,
        subject: &SubjectKey,
        job_id: JobId,
        ttl: Duration,
    ) -> Result<Acquire, StoreError> {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).ok_or(StoreError::LeaseOverflow(ttl))?;
        let lock = JobLock {
            subject_key: subject.clone(),
            job_id,
            acquired_at: now,
            expires_at,
        };

        // The entry guard holds the shard for the whole check-and-create.
        match self.locks.entry(subject.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_live_at(now) {
                    return Ok(Acquire::Held(entry.get().clone()));
                }
                let stale = entry.insert(lock.clone());
                tracing::debug!(
                    subject = %subject,
                    stale_job_id = %stale.job_id,
                    "replacing expired lock"
                );
                self.owners.remove(&stale.job_id);
                self.owners.insert(job_id, subject.clone());
                Ok(Acquire::Acquired(lock))
            }
            Entry::Vacant(entry) => {
                entry.insert(lock.clone());
                self.owners.insert(job_id, subject.clone());
                Ok(Acquire::Acquired(lock))
            }
        }
    }

    async fn extend(&self, job_id: JobId, ttl: Duration) -> Result<Option<JobLock>, StoreError> {
        let Some(subject) = self.subject_of(&job_id) else {
            return Ok(None);
        };
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).ok_or(StoreError::LeaseOverflow(ttl))?;
        match self.locks.get_mut(&subject) {
            Some(mut lock) if lock.job_id == job_id && lock.is_live_at(now) => {
                lock.expires_at = expires_at;
                Ok(Some(lock.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn lookup(&self, job_id: JobId) -> Result<Option<JobLock>, StoreError> {
        let Some(subject) = self.subject_of(&job_id) else {
            return Ok(None);
        };
        let now = Instant::now();
        Ok(self
            .locks
            .get(&subject)
            .filter(|lock| lock.job_id == job_id && lock.is_live_at(now))
            .map(|lock| lock.value().clone()))
    }

    async fn remove(&self, job_id: JobId) -> Result<bool, StoreError> {
        let Some((_, subject)) = self.owners.remove(&job_id) else {
            return Ok(false);
        };
        let now = Instant::now();
        Ok(self
            .locks
            .remove_if(&subject, |_, lock| lock.job_id == job_id)
            .is_some_and(|(_, lock)| lock.is_live_at(now)))
    }

    async fn get(&self, subject: &SubjectKey) -> Result<Option<JobLock>, StoreError> {
        let now = Instant::now();
        Ok(self
            .locks
            .get(subject)
            .filter(|lock| lock.is_live_at(now))
            .map(|lock| lock.value().clone()))
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.locks.retain(|_, lock| {
            let live = lock.is_live_at(now);
            if !live {
                expired.push(lock.job_id);
            }
            live
        });
        for job_id in &expired {
            self.owners.remove(job_id);
        }
        Ok(expired.len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
