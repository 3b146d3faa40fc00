//! Job lifecycle façade: submission, status lookup and artifact retrieval.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::repos::{JobStore, StoreError};
use crate::application::watcher::{CompletionWatcher, WatchOptions, WatchOutcome};
use crate::domain::attachment::{DecodeError, SourceField, parse_source};
use crate::domain::entities::{
    JobArgs, JobRecord, JobSnapshot, RecordUpdate, TaskType, arg_keys, generate_job_id,
};
use crate::domain::error::DomainError;
use crate::domain::types::{JobStatus, StatusSet};
use crate::infra::sources::{SourceStorage, SourceStorageError, StoredSource};

#[derive(Debug, Error)]
pub enum JobServiceError {
    #[error("invalid task type: {0}")]
    InvalidTaskType(#[source] DomainError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Source(#[from] SourceStorageError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("artifact for job `{id}` is missing{}", expected_suffix(.expected))]
    ArtifactMissing { id: String, expected: Option<PathBuf> },
}

impl JobServiceError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

fn expected_suffix(expected: &Option<PathBuf>) -> String {
    match expected {
        Some(path) => format!(" (expected at `{}`)", path.display()),
        None => " (no artifact path recorded)".to_string(),
    }
}

/// A submission as received: an arbitrary JSON object.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub args: JobArgs,
}

impl JobRequest {
    pub fn new(args: JobArgs) -> Self {
        Self { args }
    }

    pub fn from_value(value: Value) -> Result<Self, JobServiceError> {
        match value {
            Value::Object(args) => Ok(Self { args }),
            other => Err(JobServiceError::invalid_request(format!(
                "job request must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// What a caller learns right after submitting.
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub id: String,
    pub status: JobStatus,
    pub job_file: String,
    pub jobs_directory: String,
    pub destination: Option<String>,
    pub args: JobArgs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub id: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNotice {
    pub id: String,
    pub status: JobStatus,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactOutcome {
    Ready(ArtifactLocation),
    Pending(PendingNotice),
    Failed { id: String, reason: Option<String> },
}

#[derive(Debug, Clone, Copy)]
pub struct LifecycleOptions {
    /// Poll interval used when callers do not pick one.
    pub poll_interval: Duration,
    pub corruption_grace: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            corruption_grace: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    sources: Arc<SourceStorage>,
    watcher: CompletionWatcher,
    poll_interval: Duration,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        sources: Arc<SourceStorage>,
        options: LifecycleOptions,
    ) -> Self {
        let watcher = CompletionWatcher::new(store.clone(), options.corruption_grace);
        Self {
            store,
            sources,
            watcher,
            poll_interval: options.poll_interval,
        }
    }

    /// Record a new job in `Created` and return immediately.
    ///
    /// An inline `source` attachment is written to the sources area first and the
    /// args are rewritten to reference it by name.
    pub async fn submit(&self, request: JobRequest) -> Result<JobHandle, JobServiceError> {
        let mut args = request.args;

        let task_type = match args.get(arg_keys::TASK_TYPE) {
            Some(Value::String(raw)) => TaskType::parse(raw),
            Some(_) => Err(DomainError::validation("taskType must be a string")),
            None => Err(DomainError::validation("taskType is required")),
        }
        .map_err(JobServiceError::InvalidTaskType)?;

        let source = match args.get(arg_keys::SOURCE) {
            Some(Value::String(raw)) => parse_source(raw)?,
            _ => SourceField::Absent,
        };
        let stored = match &source {
            SourceField::Inline(attachment) => {
                let stored = self.sources.store(attachment).await?;
                args.insert(
                    arg_keys::SOURCE.to_string(),
                    Value::String(stored.name.clone()),
                );
                args.insert(
                    arg_keys::SOURCE_EXT.to_string(),
                    Value::String(stored.extension.clone()),
                );
                Some(stored)
            }
            _ => None,
        };

        let now = OffsetDateTime::now_utc();
        let id = generate_job_id(&task_type, now);
        let record = JobRecord::new(id, &task_type, args, now);
        if let Err(err) = self.store.create(&record).await {
            if let Some(stored) = stored.as_ref() {
                self.discard_source(&record.id, stored).await;
            }
            return Err(self.store_error(&record.id, err));
        }

        counter!("jobdock_jobs_submitted_total", "task_type" => task_type.as_str().to_string())
            .increment(1);
        info!(
            target = "jobdock::jobs",
            job_id = %record.id,
            task_type = task_type.as_str(),
            source_bytes = stored.as_ref().map(|stored| stored.size_bytes),
            "job submitted"
        );

        Ok(JobHandle {
            job_file: self.store.location(JobStatus::Created, &record.id),
            jobs_directory: self.store.root(),
            destination: record.destination().map(str::to_string),
            status: JobStatus::Created,
            id: record.id,
            args: record.args,
        })
    }

    pub async fn status(&self, id: &str) -> Result<JobSnapshot, JobServiceError> {
        self.store
            .read(id)
            .await
            .map_err(|err| self.store_error(id, err))
    }

    /// Locate a finished job's artifact, or report why there is none yet.
    pub async fn fetch_artifact(&self, id: &str) -> Result<ArtifactOutcome, JobServiceError> {
        let snapshot = self.status(id).await?;
        let record = snapshot.record;

        match snapshot.status {
            JobStatus::Created | JobStatus::Queued => Ok(ArtifactOutcome::Pending(PendingNotice {
                id: record.id,
                status: snapshot.status,
                created_at: record.created_at,
            })),
            JobStatus::Failed => Ok(ArtifactOutcome::Failed {
                id: record.id,
                reason: record.failure_reason,
            }),
            JobStatus::Completed => {
                let Some(path) = record.resolve_artifact_path() else {
                    return Err(JobServiceError::ArtifactMissing {
                        id: record.id,
                        expected: None,
                    });
                };

                match tokio::fs::metadata(&path).await {
                    Ok(metadata) if metadata.is_file() => {
                        Ok(ArtifactOutcome::Ready(ArtifactLocation {
                            id: record.id,
                            path,
                            size_bytes: metadata.len(),
                        }))
                    }
                    Ok(_) => Err(JobServiceError::ArtifactMissing {
                        id: record.id,
                        expected: Some(path),
                    }),
                    Err(err) => {
                        warn!(
                            target = "jobdock::jobs",
                            job_id = %record.id,
                            path = %path.display(),
                            error = %err,
                            "artifact of completed job is not readable"
                        );
                        Err(JobServiceError::ArtifactMissing {
                            id: record.id,
                            expected: Some(path),
                        })
                    }
                }
            }
        }
    }

    pub async fn await_status(
        &self,
        id: &str,
        targets: StatusSet,
        options: WatchOptions,
        cancel: &CancellationToken,
    ) -> Result<WatchOutcome, JobServiceError> {
        self.watcher
            .await_status(id, targets, options, cancel)
            .await
            .map_err(|err| self.store_error(id, err))
    }

    /// Wait for a terminal status using the configured poll interval.
    pub async fn await_terminal(
        &self,
        id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WatchOutcome, JobServiceError> {
        let options = WatchOptions {
            timeout,
            poll_interval: self.poll_interval,
        };
        self.await_status(id, StatusSet::terminal(), options, cancel)
            .await
    }

    pub async fn transition(
        &self,
        id: &str,
        from: JobStatus,
        to: JobStatus,
        update: RecordUpdate,
    ) -> Result<JobSnapshot, JobServiceError> {
        self.store
            .transition_with(id, from, to, update)
            .await
            .map_err(|err| self.store_error(id, err))
    }

    pub async fn list(&self, status: JobStatus) -> Result<Vec<String>, JobServiceError> {
        Ok(self.store.list(status).await?)
    }

    /// Remove an attachment whose job was never recorded.
    async fn discard_source(&self, id: &str, stored: &StoredSource) {
        if let Err(err) = self.sources.remove(stored).await {
            warn!(
                target = "jobdock::jobs",
                job_id = id,
                path = %stored.path.display(),
                error = %err,
                "failed to remove source of a rejected submission"
            );
        }
    }

    /// Single escalation point for store failures reaching callers.
    fn store_error(&self, id: &str, err: StoreError) -> JobServiceError {
        if let StoreError::CorruptState { partitions, .. } = &err {
            counter!("jobdock_store_corruption_total").increment(1);
            error!(
                target = "jobdock::jobs",
                job_id = id,
                partitions = ?partitions,
                "job is present in several partitions"
            );
        }
        JobServiceError::Store(err)
    }
}
