use std::error::Error as StdError;

use axum::Json;
use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use jobdock_api_types::{ApiErrorBody, ApiErrorMessage};

use crate::application::error::ErrorReport;
use crate::application::lifecycle::JobServiceError;
use crate::application::repos::StoreError;
use crate::infra::sources::SourceStorageError;

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    pub const INVALID_TASK_TYPE: &str = "invalid_task_type";
    pub const DECODE_ERROR: &str = "decode_error";
    pub const PATH_TRAVERSAL: &str = "path_traversal";
    pub const DUPLICATE: &str = "duplicate";
    pub const NOT_FOUND: &str = "not_found";
    pub const JOB_FAILED: &str = "job_failed";
    pub const ARTIFACT_MISSING: &str = "artifact_missing";
    pub const CORRUPT_STATE: &str = "corrupt_state";
    pub const INVALID_TRANSITION: &str = "invalid_transition";
    pub const ILLEGAL_EDGE: &str = "illegal_edge";
    pub const STORAGE: &str = "storage_error";
}

const SOURCE: &str = "infra::http::error::ApiError";

/// JSON error response of the job API.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    report: ErrorReport,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        let detail = format!("{code}: {}", hint.as_deref().unwrap_or(message));
        Self {
            status,
            code,
            message,
            hint,
            report: ErrorReport::from_message(SOURCE, status, detail),
        }
    }

    /// Like [`ApiError::new`], keeping the whole error chain for the response log.
    fn with_error(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
        error: &dyn StdError,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            report: ErrorReport::from_error(SOURCE, status, error),
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn job_failed(id: &str, reason: Option<String>) -> Self {
        let hint = reason.unwrap_or_else(|| format!("job `{id}` failed without a reason"));
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::JOB_FAILED,
            "Job failed",
            Some(hint),
        )
    }

    pub fn from_body_rejection(rejection: BytesRejection) -> Self {
        let status = rejection.status();
        let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
            codes::PAYLOAD_TOO_LARGE
        } else {
            codes::BAD_REQUEST
        };
        Self::with_error(
            status,
            code,
            "Request body could not be read",
            Some(rejection.body_text()),
            &rejection,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<JobServiceError> for ApiError {
    fn from(err: JobServiceError) -> Self {
        let hint = Some(err.to_string());
        let (status, code, message) = match &err {
            JobServiceError::InvalidTaskType(_) => (
                StatusCode::BAD_REQUEST,
                codes::INVALID_TASK_TYPE,
                "Invalid task type",
            ),
            JobServiceError::InvalidRequest(_) => (
                StatusCode::BAD_REQUEST,
                codes::BAD_REQUEST,
                "Invalid job request",
            ),
            JobServiceError::Decode(_) => (
                StatusCode::BAD_REQUEST,
                codes::DECODE_ERROR,
                "Source attachment could not be decoded",
            ),
            JobServiceError::Source(SourceStorageError::PathTraversal { .. }) => (
                StatusCode::BAD_REQUEST,
                codes::PATH_TRAVERSAL,
                "Source attachment name is not allowed",
            ),
            JobServiceError::Source(SourceStorageError::Io(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::STORAGE,
                "Source attachment could not be stored",
            ),
            JobServiceError::ArtifactMissing { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::ARTIFACT_MISSING,
                "Job completed but its artifact is missing",
            ),
            JobServiceError::Store(store) => store_status(store),
        };
        Self::with_error(status, code, message, hint, &err)
    }
}

fn store_status(err: &StoreError) -> (StatusCode, &'static str, &'static str) {
    match err {
        StoreError::AlreadyExists { .. } => (
            StatusCode::CONFLICT,
            codes::DUPLICATE,
            "Job already exists",
        ),
        StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, codes::NOT_FOUND, "Job not found"),
        StoreError::InvalidId { .. } => (
            StatusCode::BAD_REQUEST,
            codes::BAD_REQUEST,
            "Invalid job id",
        ),
        StoreError::InvalidTransition { .. } => (
            StatusCode::CONFLICT,
            codes::INVALID_TRANSITION,
            "Job is not in the expected status",
        ),
        StoreError::IllegalStatusEdge { .. } => (
            StatusCode::CONFLICT,
            codes::ILLEGAL_EDGE,
            "Status change is not permitted",
        ),
        StoreError::CorruptState { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::CORRUPT_STATE,
            "Job storage is inconsistent",
        ),
        StoreError::Serialization { .. } | StoreError::Io(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::STORAGE,
            "Job storage failed",
        ),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        self.report.attach(&mut response);
        response
    }
}
