//! Storage trait for the job state machine.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{JobRecord, JobSnapshot, RecordUpdate};
use crate::domain::types::JobStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job `{id}` already exists in the `{status}` partition")]
    AlreadyExists { id: String, status: JobStatus },
    #[error("job `{id}` not found")]
    NotFound { id: String },
    #[error("job `{id}` is `{actual}`, not `{expected}`")]
    InvalidTransition {
        id: String,
        expected: JobStatus,
        actual: JobStatus,
    },
    #[error("status edge `{from}` -> `{to}` is not permitted")]
    IllegalStatusEdge { from: JobStatus, to: JobStatus },
    #[error("job `{id}` is present in several partitions: {}", list_statuses(.partitions))]
    CorruptState {
        id: String,
        partitions: Vec<JobStatus>,
    },
    #[error("job id `{id}` is not a valid identifier")]
    InvalidId { id: String },
    #[error("job record `{id}` could not be (de)serialized: {message}")]
    Serialization { id: String, message: String },
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn serialization(id: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Serialization {
            id: id.into(),
            message: err.to_string(),
        }
    }

    /// Whether retrying the same read shortly may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::CorruptState { .. })
    }
}

fn list_statuses(partitions: &[JobStatus]) -> String {
    partitions
        .iter()
        .map(|status| status.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Status-partitioned job storage. The partition holding a record is its status.
///
/// All mutation goes through [`JobStore::create`] and [`JobStore::transition_with`];
/// implementations must make both linearizable per job id while leaving distinct ids
/// independent.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a new record in the `Created` partition.
    async fn create(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// Resolve the record and its current status.
    async fn read(&self, id: &str) -> Result<JobSnapshot, StoreError>;

    /// Move a record between partitions, attaching executor output on the way.
    async fn transition_with(
        &self,
        id: &str,
        from: JobStatus,
        to: JobStatus,
        update: RecordUpdate,
    ) -> Result<JobSnapshot, StoreError>;

    async fn transition(
        &self,
        id: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<JobSnapshot, StoreError> {
        self.transition_with(id, from, to, RecordUpdate::default())
            .await
    }

    /// Ids currently held in one partition, sorted.
    async fn list(&self, status: JobStatus) -> Result<Vec<String>, StoreError>;

    /// Human-readable location of a record in a given partition.
    fn location(&self, status: JobStatus, id: &str) -> String;

    /// Human-readable location of the store itself.
    fn root(&self) -> String;
}
