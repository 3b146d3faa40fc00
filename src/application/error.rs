use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::lifecycle::JobServiceError, domain::error::DomainError,
    domain::types::JobStatus, infra::error::InfraError,
};

/// Diagnostics riding along a failed response until the logging middleware picks them up.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Plain-text error response for routes outside the JSON job API.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        Self {
            status,
            public_message,
            report: ErrorReport::from_error(source, status, error),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

/// Top-level failure of a `jobdock` command.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Jobs(#[from] JobServiceError),
    #[error("job `{id}` did not reach the requested status in time (last seen: {})", last_seen(.last_status))]
    TimedOut {
        id: String,
        last_status: Option<JobStatus>,
    },
    #[error("interrupted")]
    Interrupted,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

fn last_seen(status: &Option<JobStatus>) -> &'static str {
    status.map(JobStatus::as_str).unwrap_or("unknown")
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit code: 2 for caller mistakes, 3 for lost races, 4 for timeouts,
    /// 130 when interrupted, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        use crate::application::repos::StoreError;

        match self {
            AppError::Validation(_)
            | AppError::Domain(DomainError::Validation { .. })
            | AppError::Jobs(JobServiceError::InvalidRequest(_))
            | AppError::Jobs(JobServiceError::InvalidTaskType(_))
            | AppError::Jobs(JobServiceError::Store(StoreError::IllegalStatusEdge { .. }))
            | AppError::Jobs(JobServiceError::Store(StoreError::InvalidId { .. })) => 2,
            AppError::Jobs(JobServiceError::Store(StoreError::InvalidTransition { .. }))
            | AppError::Jobs(JobServiceError::Store(StoreError::AlreadyExists { .. })) => 3,
            AppError::TimedOut { .. } => 4,
            AppError::Interrupted => 130,
            _ => 1,
        }
    }
}
