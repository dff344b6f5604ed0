// crates/core/src/guard.rs
//! Admission control: at most one live job per subject key.

use std::sync::Arc;
use std::time::Duration;

use crate::config::MAX_LEASE;
use crate::error::{GuardError, TrackerError};
use crate::store::{Acquire, LockStore};
use crate::tracker::JobProgressTracker;
use crate::types::{JobId, SubjectKey};

/// Result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitResult {
    /// A new job was admitted and its record created in `Pending`.
    Admitted { job_id: JobId },
    /// A live job already holds the subject; observe it instead of retrying.
    AlreadyInProgress { job_id: JobId },
}

impl AdmitResult {
    pub fn job_id(&self) -> JobId {
        match self {
            AdmitResult::Admitted { job_id } | AdmitResult::AlreadyInProgress { job_id } => *job_id,
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmitResult::Admitted { .. })
    }
}

/// Gatekeeps job admission per subject key and manages lock leases.
///
/// The guard never fails open: if the store cannot answer, `try_admit`
/// returns `GuardError::Unavailable` and the caller must reject the request.
#[derive(Clone)]
pub struct SubmissionGuard {
    store: Arc<dyn LockStore>,
    tracker: Arc<JobProgressTracker>,
}

impl SubmissionGuard {
    pub fn new(store: Arc<dyn LockStore>, tracker: Arc<JobProgressTracker>) -> Self {
        Self { store, tracker }
    }

    pub fn tracker(&self) -> &Arc<JobProgressTracker> {
        &self.tracker
    }

    /// Name of the backing lock store.
    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Admit a new job for `subject` unless a live one exists.
    pub async fn try_admit(&self, subject: &SubjectKey, lease: Duration) -> Result<AdmitResult, GuardError> {
        check_lease(lease)?;

        let candidate = JobId::new();
        let outcome = self
            .store
            .acquire(subject, candidate, lease)
            .await
            .inspect_err(|e| {
                tracing::error!(subject = %subject, store = self.store.name(), error = %e, "admission check failed");
            })?;

        match outcome {
            Acquire::Acquired(lock) => {
                match self.tracker.initialize(lock.job_id) {
                    Ok(()) => {}
                    // Fresh ids cannot collide with a started record; keep the lock either way.
                    Err(TrackerError::AlreadyStarted(id)) => {
                        tracing::error!(job_id = %id, "fresh job id already tracked");
                    }
                    Err(e) => tracing::error!(job_id = %lock.job_id, error = %e, "failed to initialize job record"),
                }
                tracing::info!(subject = %subject, job_id = %lock.job_id, lease_secs = lease.as_secs(), "job admitted");
                Ok(AdmitResult::Admitted { job_id: lock.job_id })
            }
            Acquire::Held(lock) => {
                tracing::debug!(subject = %subject, job_id = %lock.job_id, "job already in progress");
                Ok(AdmitResult::AlreadyInProgress { job_id: lock.job_id })
            }
        }
    }

    /// Heartbeat: extend the lease of a lock the job still owns.
    ///
    /// `NotFound` means the lock expired or was released; the job should stop.
    pub async fn renew(&self, job_id: JobId, lease: Duration) -> Result<(), GuardError> {
        check_lease(lease)?;
        match self.store.extend(job_id, lease).await? {
            Some(_) => {
                tracing::trace!(job_id = %job_id, "lease renewed");
                Ok(())
            }
            None => {
                tracing::warn!(job_id = %job_id, "lease renewal refused, lock no longer held");
                Err(GuardError::NotFound(job_id))
            }
        }
    }

    /// Drop the lock owned by `job_id`.
    pub async fn release(&self, job_id: JobId) -> Result<(), GuardError> {
        if self.store.remove(job_id).await? {
            tracing::debug!(job_id = %job_id, "lock released");
            Ok(())
        } else {
            Err(GuardError::NotFound(job_id))
        }
    }

    /// Job currently holding `subject`, if any.
    pub async fn holder(&self, subject: &SubjectKey) -> Result<Option<JobId>, GuardError> {
        Ok(self.store.get(subject).await?.map(|lock| lock.job_id))
    }

    /// Housekeeping pass over the backing store.
    pub async fn purge_expired(&self) -> Result<usize, GuardError> {
        Ok(self.store.purge_expired().await?)
    }

    /// Fail every non-terminal record whose job no longer holds a live lock.
    ///
    /// Catches jobs that died without calling `fail` or `release`; their lock
    /// expires on its own but the record would otherwise stay active forever.
    /// Returns the number of records failed.
    pub async fn reap_orphans(&self) -> Result<usize, GuardError> {
        let mut reaped = 0;
        for snapshot in self.tracker.active() {
            if self.store.lookup(snapshot.job_id).await?.is_some() {
                continue;
            }
            match self.tracker.fail(snapshot.job_id, ORPHANED) {
                Ok(()) => reaped += 1,
                // Finished between the scan and the lookup.
                Err(e) => tracing::debug!(job_id = %snapshot.job_id, error = %e, "orphan already settled"),
            }
        }
        if reaped > 0 {
            tracing::warn!(reaped, "failed jobs whose lease lapsed without release");
        }
        Ok(reaped)
    }
}

/// Failure reason recorded for jobs reaped after their lease lapsed.
pub const ORPHANED: &str = "lease expired without release";

fn check_lease(lease: Duration) -> Result<(), GuardError> {
    if lease.is_zero() || lease > MAX_LEASE {
        return Err(GuardError::InvalidLease);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryLockStore;
    use crate::types::{JobLock, JobState};
    use async_trait::async_trait;

    const LEASE: Duration = Duration::from_secs(300);

    fn guard() -> SubmissionGuard {
        SubmissionGuard::new(Arc::new(MemoryLockStore::new()), Arc::new(JobProgressTracker::new()))
    }

    /// Store whose backend is down.
    struct OfflineStore;

    #[async_trait]
    impl LockStore for OfflineStore {
        async fn acquire(&self, _: &SubjectKey, _: JobId, _: Duration) -> Result<Acquire, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn extend(&self, _: JobId, _: Duration) -> Result<Option<JobLock>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn remove(&self, _: JobId) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn lookup(&self, _: JobId) -> Result<Option<JobLock>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn get(&self, _: &SubjectKey) -> Result<Option<JobLock>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn purge_expired(&self) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn name(&self) -> &str {
            "offline"
        }
    }

    #[tokio::test]
    async fn test_admit_creates_pending_record() {
        let guard = guard();
        let subject = SubjectKey::new("user:42:export").unwrap();

        let result = guard.try_admit(&subject, LEASE).await.unwrap();
        assert!(result.is_admitted());

        let snap = guard.tracker().query(result.job_id()).unwrap();
        assert_eq!(snap.state, JobState::Pending);
        assert_eq!(guard.holder(&subject).await.unwrap(), Some(result.job_id()));
    }

    #[tokio::test]
    async fn test_second_admit_returns_existing_job() {
        let guard = guard();
        let subject = SubjectKey::new("user:42:export").unwrap();

        let first = guard.try_admit(&subject, LEASE).await.unwrap();
        let second = guard.try_admit(&subject, LEASE).await.unwrap();
        assert_eq!(second, AdmitResult::AlreadyInProgress { job_id: first.job_id() });
        // No record is created for the rejected attempt.
        assert_eq!(guard.tracker().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_lease_rejected() {
        let guard = guard();
        let subject = SubjectKey::new("k").unwrap();
        assert!(matches!(
            guard.try_admit(&subject, Duration::ZERO).await,
            Err(GuardError::InvalidLease)
        ));
        assert!(matches!(
            guard.renew(JobId::new(), Duration::ZERO).await,
            Err(GuardError::InvalidLease)
        ));
    }

    #[tokio::test]
    async fn test_unbounded_lease_rejected() {
        let guard = guard();
        let subject = SubjectKey::new("k").unwrap();
        assert!(matches!(
            guard.try_admit(&subject, Duration::MAX).await,
            Err(GuardError::InvalidLease)
        ));
        assert!(matches!(
            guard.try_admit(&subject, Duration::from_secs(u64::MAX)).await,
            Err(GuardError::InvalidLease)
        ));
        assert!(guard.tracker().is_empty());

        let job = guard.try_admit(&subject, LEASE).await.unwrap().job_id();
        assert!(matches!(
            guard.renew(job, Duration::MAX).await,
            Err(GuardError::InvalidLease)
        ));
        guard.renew(job, MAX_LEASE).await.unwrap();
        assert_eq!(guard.holder(&subject).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn test_unavailable_store_does_not_fail_open() {
        let guard = SubmissionGuard::new(Arc::new(OfflineStore), Arc::new(JobProgressTracker::new()));
        let subject = SubjectKey::new("user:1:export").unwrap();

        let err = guard.try_admit(&subject, LEASE).await.unwrap_err();
        assert!(matches!(err, GuardError::Unavailable(_)));
        assert!(guard.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_release_frees_subject() {
        let guard = guard();
        let subject = SubjectKey::new("k").unwrap();
        let first = guard.try_admit(&subject, LEASE).await.unwrap().job_id();

        guard.release(first).await.unwrap();
        assert!(matches!(guard.release(first).await, Err(GuardError::NotFound(id)) if id == first));
        assert!(matches!(guard.renew(first, LEASE).await, Err(GuardError::NotFound(_))));

        let second = guard.try_admit(&subject, LEASE).await.unwrap();
        assert!(second.is_admitted());
        assert_ne!(second.job_id(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_keeps_lock_alive() {
        let guard = guard();
        let subject = SubjectKey::new("k").unwrap();
        let lease = Duration::from_secs(10);
        let job = guard.try_admit(&subject, lease).await.unwrap().job_id();

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(8)).await;
            guard.renew(job, lease).await.unwrap();
        }
        assert_eq!(guard.holder(&subject).await.unwrap(), Some(job));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_orphans_fails_abandoned_jobs() {
        let guard = guard();
        let abandoned = guard
            .try_admit(&SubjectKey::new("user:1:export").unwrap(), Duration::from_secs(10))
            .await
            .unwrap()
            .job_id();
        guard.tracker().report_progress(abandoned, 1, 10).unwrap();

        let healthy_subject = SubjectKey::new("user:2:export").unwrap();
        let healthy = guard.try_admit(&healthy_subject, LEASE).await.unwrap().job_id();

        // Nothing is reaped while leases are live.
        assert_eq!(guard.reap_orphans().await.unwrap(), 0);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(guard.reap_orphans().await.unwrap(), 1);

        let snap = guard.tracker().query(abandoned).unwrap();
        assert_eq!(snap.state, JobState::Failed);
        assert_eq!(snap.error.as_deref(), Some(ORPHANED));
        assert_eq!(guard.tracker().query(healthy).unwrap().state, JobState::Pending);

        // Terminal now, so retention applies.
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(guard.tracker().sweep(Duration::from_secs(3600)), 1);
        assert!(guard.tracker().query(abandoned).is_err());
    }

    #[tokio::test]
    async fn test_reap_orphans_surfaces_store_outage() {
        let tracker = Arc::new(JobProgressTracker::new());
        let job = JobId::new();
        tracker.initialize(job).unwrap();
        let guard = SubmissionGuard::new(Arc::new(OfflineStore), Arc::clone(&tracker));

        assert!(matches!(guard.reap_orphans().await, Err(GuardError::Unavailable(_))));
        assert_eq!(tracker.query(job).unwrap().state, JobState::Pending);
    }

    #[test]
    fn test_store_name() {
        assert_eq!(guard().store_name(), "memory");
    }
}
