//! Persisted job records and the identifiers that name them.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};

use jobdock_api_types::JobStatusView;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::error::DomainError;
use super::types::JobStatus;

/// Opaque caller-supplied job arguments.
pub type JobArgs = Map<String, Value>;

/// Argument keys the lifecycle core looks at. Everything else is carried untouched.
pub mod arg_keys {
    pub const TASK_TYPE: &str = "taskType";
    pub const SOURCE: &str = "source";
    pub const SOURCE_EXT: &str = "sourceExt";
    pub const OUTPUT_FILE_PATH: &str = "outputFilePath";
    pub const ARTIFACT_PATH: &str = "artifactPath";
}

const TASK_TYPE_MAX_LEN: usize = 64;

/// Validated task type; it becomes the prefix of the job id and therefore of a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskType(String);

impl TaskType {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(DomainError::validation("taskType must not be empty"));
        }
        if value.len() > TASK_TYPE_MAX_LEN {
            return Err(DomainError::validation(format!(
                "taskType must be at most {TASK_TYPE_MAX_LEN} characters"
            )));
        }
        if !value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(DomainError::validation(
                "taskType may only contain ASCII letters, digits, `-` and `_`",
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

static LAST_ID_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Millisecond timestamp that never repeats or goes backwards within this process.
fn next_id_millis(now: OffsetDateTime) -> i64 {
    let wall = (now.unix_timestamp_nanos() / 1_000_000) as i64;
    let mut last = LAST_ID_MILLIS.load(Ordering::Relaxed);
    loop {
        let candidate = wall.max(last + 1);
        match LAST_ID_MILLIS.compare_exchange_weak(
            last,
            candidate,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(observed) => last = observed,
        }
    }
}

/// Build a job id of the form `{taskType}_{creationMillis}`.
pub fn generate_job_id(task_type: &TaskType, now: OffsetDateTime) -> String {
    format!("{}_{}", task_type.as_str(), next_id_millis(now))
}

/// Whether `id` is safe to use as a partition file stem.
pub fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= TASK_TYPE_MAX_LEN + 24
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

/// The durable part of a job. Its status is not stored here; it is the partition holding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub task_type: String,
    pub args: JobArgs,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl JobRecord {
    pub fn new(id: String, task_type: &TaskType, args: JobArgs, created_at: OffsetDateTime) -> Self {
        Self {
            id,
            task_type: task_type.as_str().to_string(),
            args,
            created_at,
            updated_at: None,
            artifact_path: None,
            failure_reason: None,
        }
    }

    /// Where the executor was asked to write its output, if the request said.
    pub fn destination(&self) -> Option<&str> {
        self.args
            .get(arg_keys::OUTPUT_FILE_PATH)
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Artifact location: the executor-recorded path, then `artifactPath`, then `outputFilePath`.
    pub fn resolve_artifact_path(&self) -> Option<PathBuf> {
        if let Some(path) = self.artifact_path.as_ref() {
            return Some(path.clone());
        }
        self.args
            .get(arg_keys::ARTIFACT_PATH)
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
            .or_else(|| self.destination())
            .map(PathBuf::from)
    }
}

/// A record together with the partition it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub record: JobRecord,
}

impl JobSnapshot {
    pub fn to_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.record.id.clone(),
            task_type: self.record.task_type.clone(),
            status: self.status.into(),
            created_at: self.record.created_at,
            updated_at: self.record.updated_at,
            artifact_path: self
                .record
                .artifact_path
                .as_ref()
                .map(|path| path.display().to_string()),
            failure_reason: self.record.failure_reason.clone(),
            args: self.record.args.clone(),
        }
    }
}

/// Fields an executor may attach while moving a record between partitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub artifact_path: Option<PathBuf>,
    pub failure_reason: Option<String>,
}

impl RecordUpdate {
    pub fn apply(&self, record: &mut JobRecord, at: OffsetDateTime) {
        if let Some(path) = self.artifact_path.as_ref() {
            record.artifact_path = Some(path.clone());
        }
        if let Some(reason) = self.failure_reason.as_ref() {
            record.failure_reason = Some(reason.clone());
        }
        record.updated_at = Some(at);
    }
}
