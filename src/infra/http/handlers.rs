use std::path::Path as FsPath;
use std::time::Duration;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State, rejection::BytesRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use jobdock_api_types::{JobStatusView, SubmitResponse};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::application::error::HttpError;
use crate::application::lifecycle::{
    ArtifactLocation, ArtifactOutcome, JobRequest, JobServiceError, PendingNotice,
};
use crate::infra::assets::AssetError;
use crate::presentation::views::{PendingPageView, PendingTemplate, render_template_response};

use super::AppState;
use super::error::ApiError;

pub(super) async fn submit_job(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let body = body.map_err(ApiError::from_body_rejection)?;
    let value: Value = serde_json::from_slice(&body).map_err(|err| {
        ApiError::bad_request("Request body is not valid JSON", Some(err.to_string()))
    })?;

    let handle = state.jobs.submit(JobRequest::from_value(value)?).await?;

    Ok(Json(SubmitResponse {
        args: handle.args,
        destination: handle.destination,
        status: handle.status.into(),
        id: handle.id,
        job_file: handle.job_file,
        jobs_directory: handle.jobs_directory,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct FetchQuery {
    /// Milliseconds to wait for a terminal status before answering.
    wait: Option<u64>,
}

pub(super) async fn fetch_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<FetchQuery>,
) -> Result<Response, ApiError> {
    if let Some(wait_ms) = query.wait.filter(|ms| *ms > 0) {
        let timeout = Duration::from_millis(wait_ms).min(state.max_wait);
        // Dropping this future (client gone) ends the wait as well.
        let cancel = CancellationToken::new();
        let outcome = state.jobs.await_terminal(&id, timeout, &cancel).await?;
        debug!(
            target = "jobdock::http::jobs",
            job_id = %id,
            outcome = ?outcome,
            "long-poll finished"
        );
    }

    match state.jobs.fetch_artifact(&id).await? {
        ArtifactOutcome::Ready(location) => artifact_response(location).await,
        ArtifactOutcome::Pending(notice) => Ok(pending_response(&notice, state.pending_refresh)),
        ArtifactOutcome::Failed { id, reason } => Err(ApiError::job_failed(&id, reason)),
    }
}

pub(super) async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusView>, ApiError> {
    let snapshot = state.jobs.status(&id).await?;
    Ok(Json(snapshot.to_view()))
}

async fn artifact_response(location: ArtifactLocation) -> Result<Response, ApiError> {
    let file = match tokio::fs::File::open(&location.path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(JobServiceError::ArtifactMissing {
                id: location.id,
                expected: Some(location.path),
            }
            .into());
        }
        Err(err) => {
            return Err(JobServiceError::Store(err.into()).into());
        }
    };

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();

    let mime = mime_guess::from_path(&location.path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&location.size_bytes.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    if let Some(value) = content_disposition(&location.path) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

fn content_disposition(path: &FsPath) -> Option<HeaderValue> {
    let name = path.file_name()?.to_string_lossy();
    let safe: String = name
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\"")).ok()
}

fn pending_response(notice: &PendingNotice, refresh: Duration) -> Response {
    let view = PendingPageView::new(notice, refresh);
    let retry_after = view.refresh_seconds;
    let mut response = render_template_response(PendingTemplate { view }, StatusCode::ACCEPTED);

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
        headers.insert(header::RETRY_AFTER, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct AssetQuery {
    target: Option<String>,
}

pub(super) async fn public_asset(
    State(state): State<AppState>,
    Path((domain, signal)): Path<(String, String)>,
    Query(query): Query<AssetQuery>,
) -> Response {
    const SOURCE: &str = "infra::http::handlers::public_asset";

    let mut segments = vec![domain.as_str(), signal.as_str()];
    if let Some(target) = query.target.as_deref().filter(|t| !t.is_empty()) {
        segments.push(target);
    }

    match state.assets.read(&segments).await {
        Ok(asset) => asset.into_response(),
        Err(err) if err.is_not_found() => HttpError::from_error(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Asset not found",
            &err,
        )
        .into_response(),
        Err(err) => {
            if let AssetError::Io(io) = &err {
                error!(
                    target = SOURCE,
                    path = ?segments,
                    error = %io,
                    "failed to read static asset"
                );
            }
            HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read asset",
                &err,
            )
            .into_response()
        }
    }
}

pub(super) async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
