use std::time::Duration;

use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;

use crate::application::error::HttpError;
use crate::application::lifecycle::PendingNotice;

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Data shown while a job has not finished yet.
#[derive(Debug, Clone)]
pub struct PendingPageView {
    pub id: String,
    pub status: &'static str,
    pub created_at: String,
    pub refresh_seconds: u64,
    pub status_url: String,
}

impl PendingPageView {
    pub fn new(notice: &PendingNotice, refresh: Duration) -> Self {
        let created_at = notice
            .created_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| notice.created_at.to_string());

        Self {
            id: notice.id.clone(),
            status: notice.status.as_str(),
            created_at,
            refresh_seconds: refresh.as_secs().max(1),
            status_url: format!("/job/{}/status", notice.id),
        }
    }
}

#[derive(Template)]
#[template(path = "pending.html")]
pub struct PendingTemplate {
    pub view: PendingPageView,
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::domain::types::JobStatus;

    #[test]
    fn pending_page_refreshes_and_links_status() {
        let notice = PendingNotice {
            id: "render_1700000000000".to_string(),
            status: JobStatus::Queued,
            created_at: datetime!(2026-05-01 12:00 UTC),
        };

        let html = PendingTemplate {
            view: PendingPageView::new(&notice, Duration::from_secs(5)),
        }
        .render()
        .unwrap();

        assert!(html.contains(r#"http-equiv="refresh" content="5""#));
        assert!(html.contains("render_1700000000000"));
        assert!(html.contains("queued"));
        assert!(html.contains("/job/render_1700000000000/status"));
    }
}
