// crates/core/src/types.rs
//! Identifiers, lock records and the externally visible job snapshot.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::GuardError;

/// Opaque identifier of an admitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, format = Uuid)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh, random job id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Admission lock granularity: caller identity plus operation name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SubjectKey(String);

impl SubjectKey {
    /// Validate a raw subject key. Blank keys are rejected.
    pub fn new(raw: impl Into<String>) -> Result<Self, GuardError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(GuardError::InvalidSubject);
        }
        Ok(Self(raw))
    }

    /// `"{caller}:{operation}"`, e.g. `user:42:export`.
    pub fn for_operation(caller: &str, operation: &str) -> Result<Self, GuardError> {
        if caller.trim().is_empty() || operation.trim().is_empty() {
            return Err(GuardError::InvalidSubject);
        }
        Ok(Self(format!("{caller}:{operation}")))
    }

    /// Idempotency-key variant: identical payloads from the same caller map
    /// to the same subject, different payloads do not.
    ///
    /// The suffix is the hex SHA-256 of `"{caller}-{payload}"`.
    pub fn for_payload(caller: &str, operation: &str, payload: &str) -> Result<Self, GuardError> {
        let base = Self::for_operation(caller, operation)?;
        let digest = Sha256::digest(format!("{caller}-{payload}").as_bytes());
        Ok(Self(format!("{}:{}", base.0, hex::encode(digest))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle phase of a tracked job. Ordered by lifecycle progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exclusive admission for one subject key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLock {
    pub subject_key: SubjectKey,
    pub job_id: JobId,
    pub acquired_at: Instant,
    pub expires_at: Instant,
}

impl JobLock {
    pub fn is_live_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Read-only view of a job record, as served to pollers and push channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub state: JobState,
    pub current: u64,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether this snapshot describes a later point in the job's life than `prev`.
    pub fn supersedes(&self, prev: &JobSnapshot) -> bool {
        (self.state, self.current, self.updated_at) > (prev.state, prev.current, prev.updated_at)
    }
}
