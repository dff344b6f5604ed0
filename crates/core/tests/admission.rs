use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use longrun_core::{
    AdmitResult, GuardError, JobProgressTracker, JobState, MemoryLockStore, SubjectKey,
    SubmissionGuard, TrackerError, TransitionFault,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const LEASE: Duration = Duration::from_secs(300);

fn guard() -> SubmissionGuard {
    SubmissionGuard::new(
        Arc::new(MemoryLockStore::new()),
        Arc::new(JobProgressTracker::new()),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admissions_admit_exactly_one() {
    let guard = guard();
    let subject = SubjectKey::new("user:7:report").unwrap();

    let mut handles = Vec::new();
    for _ in 0..64 {
        let guard = guard.clone();
        let subject = subject.clone();
        handles.push(tokio::spawn(async move {
            guard.try_admit(&subject, LEASE).await.unwrap()
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    let admitted: Vec<_> = results.iter().filter(|r| r.is_admitted()).collect();
    assert_eq!(admitted.len(), 1);
    let winner = admitted[0].job_id();

    let ids: HashSet<_> = results.iter().map(AdmitResult::job_id).collect();
    assert_eq!(ids, HashSet::from([winner]));
    assert_eq!(guard.tracker().len(), 1);
}

#[tokio::test]
async fn export_scenario() {
    let guard = guard();
    let tracker = Arc::clone(guard.tracker());
    let subject = SubjectKey::for_operation("user:42", "export").unwrap();

    let j1 = match guard.try_admit(&subject, LEASE).await.unwrap() {
        AdmitResult::Admitted { job_id } => job_id,
        other => panic!("expected admission, got {other:?}"),
    };
    assert_eq!(
        guard.try_admit(&subject, LEASE).await.unwrap(),
        AdmitResult::AlreadyInProgress { job_id: j1 }
    );

    tracker.report_progress(j1, 50, 100).unwrap();
    let snap = tracker.query(j1).unwrap();
    assert_eq!(snap.state, JobState::Running);
    assert_eq!((snap.current, snap.total), (50, 100));

    tracker.report_progress(j1, 100, 100).unwrap();
    tracker.complete(j1, json!({"rows": 100})).unwrap();
    let snap = tracker.query(j1).unwrap();
    assert_eq!(snap.state, JobState::Succeeded);
    assert_eq!(snap.result, Some(json!({"rows": 100})));

    guard.release(j1).await.unwrap();

    let j2 = guard.try_admit(&subject, LEASE).await.unwrap();
    assert!(j2.is_admitted());
    assert_ne!(j2.job_id(), j1);
}

#[tokio::test(start_paused = true)]
async fn expired_lock_allows_readmission() {
    let guard = guard();
    let subject = SubjectKey::new("user:42:export").unwrap();
    let lease = Duration::from_secs(30);

    let j1 = guard.try_admit(&subject, lease).await.unwrap().job_id();
    tokio::time::advance(lease + Duration::from_secs(1)).await;

    assert!(matches!(guard.renew(j1, lease).await, Err(GuardError::NotFound(id)) if id == j1));

    let j2 = guard.try_admit(&subject, lease).await.unwrap();
    assert!(j2.is_admitted());
    assert_ne!(j2.job_id(), j1);
}

#[tokio::test(start_paused = true)]
async fn record_mutation_survives_lock_expiry() {
    let guard = guard();
    let tracker = Arc::clone(guard.tracker());
    let subject = SubjectKey::new("user:42:export").unwrap();
    let lease = Duration::from_secs(30);

    let j1 = guard.try_admit(&subject, lease).await.unwrap().job_id();
    tracker.report_progress(j1, 1, 4).unwrap();

    tokio::time::advance(lease * 2).await;
    // A new admission overlaps the still-running first job.
    let j2 = guard.try_admit(&subject, lease).await.unwrap().job_id();
    assert_ne!(j1, j2);

    // The stale job still owns its record.
    tracker.report_progress(j1, 4, 4).unwrap();
    tracker.complete(j1, json!({"message": "Task completed"})).unwrap();
    assert_eq!(tracker.query(j1).unwrap().state, JobState::Succeeded);

    // Its late release must not free the subject held by the new job.
    assert!(matches!(guard.release(j1).await, Err(GuardError::NotFound(_))));
    assert_eq!(guard.holder(&subject).await.unwrap(), Some(j2));
    assert_eq!(tracker.query(j2).unwrap().state, JobState::Pending);
}

#[tokio::test]
async fn completed_job_rejects_further_mutation() {
    let guard = guard();
    let tracker = Arc::clone(guard.tracker());
    let subject = SubjectKey::new("user:1:import").unwrap();
    let job = guard.try_admit(&subject, LEASE).await.unwrap().job_id();

    tracker.report_progress(job, 3, 3).unwrap();
    tracker.complete(job, json!({"ok": true})).unwrap();

    let frozen = TrackerError::InvalidTransition {
        job_id: job,
        fault: TransitionFault::Terminal(JobState::Succeeded),
    };
    assert_eq!(tracker.report_progress(job, 3, 3), Err(frozen.clone()));
    assert_eq!(tracker.complete(job, json!({"ok": false})), Err(frozen.clone()));
    assert_eq!(tracker.fail(job, "late"), Err(frozen));

    let snap = tracker.query(job).unwrap();
    assert_eq!(snap.state, JobState::Succeeded);
    assert_eq!(snap.result, Some(json!({"ok": true})));
}

#[tokio::test]
async fn never_started_job_can_fail() {
    let guard = guard();
    let tracker = Arc::clone(guard.tracker());
    let subject = SubjectKey::new("user:1:import").unwrap();
    let job = guard.try_admit(&subject, LEASE).await.unwrap().job_id();

    tracker.fail(job, "dispatch failed").unwrap();
    let snap = tracker.query(job).unwrap();
    assert_eq!(snap.state, JobState::Failed);
    assert_eq!(snap.error.as_deref(), Some("dispatch failed"));
}
