//! Wire types shared between the jobdock server and its clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Lifecycle status as exposed over the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatusName {
    Created,
    Queued,
    Completed,
    Failed,
}

/// Response body of `POST /`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub args: Map<String, Value>,
    /// Where the executor is expected to place the artifact, when the request named one.
    pub destination: Option<String>,
    pub status: JobStatusName,
    pub id: String,
    pub job_file: String,
    pub jobs_directory: String,
}

/// Response body of `GET /job/{id}/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: String,
    pub task_type: String,
    pub status: JobStatusName,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names_are_lowercase_on_the_wire() {
        let encoded = serde_json::to_string(&JobStatusName::Completed).unwrap();
        assert_eq!(encoded, "\"completed\"");

        let decoded: JobStatusName = serde_json::from_str("\"queued\"").unwrap();
        assert_eq!(decoded, JobStatusName::Queued);
    }

    #[test]
    fn submit_response_uses_camel_case_keys() {
        let response = SubmitResponse {
            args: Map::new(),
            destination: None,
            status: JobStatusName::Created,
            id: "render_1".to_string(),
            job_file: "/jobs/created/render_1.json".to_string(),
            jobs_directory: "/jobs".to_string(),
        };

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["jobFile"], "/jobs/created/render_1.json");
        assert_eq!(value["jobsDirectory"], "/jobs");
        assert_eq!(value["status"], "created");
        assert!(value["destination"].is_null());
    }
}
