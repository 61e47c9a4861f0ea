//! GitLab API client.
//!
//! Provides an HTTP client for GitLab API v4 with token authentication and
//! pagination, plus the [`GitLabApi`] trait the correlation engine is written
//! against.

use crate::error::AppError;
use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// GitLab API client configuration.
#[derive(Debug, Clone)]
pub struct GitLabClientConfig {
    /// Base URL of the GitLab instance (e.g., `https://gitlab.com`).
    pub base_url: String,

    /// Personal access token for authentication.
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GitLabClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            timeout_secs: 30,
        }
    }
}

impl From<&crate::config::Config> for GitLabClientConfig {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            base_url: config.gitlab_url.trim().to_string(),
            token: config.gitlab_token.trim().to_string(),
            timeout_secs: config.request_timeout_secs,
        }
    }
}

/// GitLab commit from the merge request commits endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitLabCommit {
    pub id: String,
    #[serde(default)]
    pub short_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub parent_ids: Vec<String>,
}

/// GitLab job from `GET /projects/:id/jobs/:job_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitLabJob {
    pub id: i64,
    #[serde(default)]
    pub status: Option<String>,
    /// Coverage percentage parsed from the job log, null when not configured.
    #[serde(default)]
    pub coverage: Option<f64>,
}

/// GitLab note/comment from API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitLabNote {
    pub id: i64,
    #[serde(default)]
    pub body: String,
}

/// Remote operations the coverage reporter needs from GitLab.
#[async_trait]
pub trait GitLabApi: Send + Sync {
    /// Commits introduced by a merge request, most recent first.
    async fn merge_request_commits(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<Vec<GitLabCommit>, AppError>;

    /// A single CI job.
    async fn job(&self, project_id: i64, job_id: i64) -> Result<GitLabJob, AppError>;

    /// Post a new note on a merge request.
    async fn create_merge_request_note(
        &self,
        project_id: i64,
        mr_iid: i64,
        body: &str,
    ) -> Result<GitLabNote, AppError>;

    /// Replace the body of an existing merge request note.
    async fn update_merge_request_note(
        &self,
        project_id: i64,
        mr_iid: i64,
        note_id: i64,
        body: &str,
    ) -> Result<GitLabNote, AppError>;
}

/// GitLab API client.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    client: Client,
    config: GitLabClientConfig,
}

/// Pagination information from GitLab API response headers.
#[derive(Debug, Clone, Default)]
pub struct PaginationInfo {
    /// Current page number.
    pub page: u32,

    /// Number of items per page.
    pub per_page: u32,

    /// Next page number (if any).
    pub next_page: Option<u32>,
}

impl GitLabClient {
    /// Create a new GitLab client.
    pub fn new(config: GitLabClientConfig) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();

        let token_value = header::HeaderValue::from_str(&config.token)
            .map_err(|_| AppError::authentication("Invalid token format"))?;
        headers.insert("PRIVATE-TOKEN", token_value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Get the base URL for API requests.
    fn api_url(&self, path: &str) -> String {
        api_url(&self.config.base_url, path)
    }

    /// Parse pagination headers from response.
    fn parse_pagination(response: &Response) -> PaginationInfo {
        let headers = response.headers();

        let get_header = |name: &str| -> Option<u32> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
        };

        PaginationInfo {
            page: get_header("x-page").unwrap_or(1),
            per_page: get_header("x-per-page").unwrap_or(20),
            next_page: get_header("x-next-page"),
        }
    }

    /// Handle API response errors.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        endpoint: &str,
    ) -> Result<T, AppError> {
        let status = response.status();

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| AppError::internal(format!("Failed to parse response: {}", e)));
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(AppError::authentication(
                "GitLab token expired or revoked",
            ));
        }

        let body = response.text().await.unwrap_or_default();
        Err(AppError::gitlab_api_full(
            error_message(status, &body),
            status.as_u16(),
            endpoint,
        ))
    }

    /// Fetch all pages of a paginated endpoint.
    pub async fn get_all_pages<T: DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> Result<Vec<T>, AppError> {
        let url = self.api_url(endpoint);
        let mut all_data = Vec::new();
        let mut page = 1u32;

        loop {
            let response = self
                .client
                .get(&url)
                .query(&[("page", page.to_string()), ("per_page", "100".to_string())])
                .send()
                .await?;
            let pagination = Self::parse_pagination(&response);
            let data = self.handle_response::<Vec<T>>(response, endpoint).await?;

            all_data.extend(data);

            match pagination.next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        Ok(all_data)
    }
}

#[async_trait]
impl GitLabApi for GitLabClient {
    async fn merge_request_commits(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<Vec<GitLabCommit>, AppError> {
        let endpoint = format!("/projects/{}/merge_requests/{}/commits", project_id, mr_iid);
        self.get_all_pages(&endpoint).await
    }

    async fn job(&self, project_id: i64, job_id: i64) -> Result<GitLabJob, AppError> {
        let endpoint = format!("/projects/{}/jobs/{}", project_id, job_id);
        let url = self.api_url(&endpoint);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response, &endpoint).await
    }

    async fn create_merge_request_note(
        &self,
        project_id: i64,
        mr_iid: i64,
        body: &str,
    ) -> Result<GitLabNote, AppError> {
        let endpoint = format!("/projects/{}/merge_requests/{}/notes", project_id, mr_iid);
        let url = self.api_url(&endpoint);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;

        self.handle_response(response, &endpoint).await
    }

    async fn update_merge_request_note(
        &self,
        project_id: i64,
        mr_iid: i64,
        note_id: i64,
        body: &str,
    ) -> Result<GitLabNote, AppError> {
        let endpoint = format!(
            "/projects/{}/merge_requests/{}/notes/{}",
            project_id, mr_iid, note_id
        );
        let url = self.api_url(&endpoint);

        let response = self
            .client
            .put(&url)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;

        self.handle_response(response, &endpoint).await
    }
}

fn api_url(base_url: &str, path: &str) -> String {
    format!("{}/api/v4{}", base_url.trim_end_matches('/'), path)
}

/// Human-readable message for a failed API response.
///
/// GitLab returns errors as `{"message": ...}` or `{"error": ...}`, where
/// `message` is sometimes an object like `{"base": ["msg"]}`.
fn error_message(status: StatusCode, body: &str) -> String {
    let body_message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message").or_else(|| v.get("error")).map(|m| match m.as_str() {
                Some(s) => s.to_string(),
                None => m.to_string(),
            })
        });

    match (status, body_message) {
        (StatusCode::FORBIDDEN, _) => "Access denied".to_string(),
        (StatusCode::NOT_FOUND, _) => "Resource not found".to_string(),
        (StatusCode::TOO_MANY_REQUESTS, _) => "Rate limit exceeded".to_string(),
        (_, Some(msg)) => msg,
        _ => format!("Request failed ({}): {}", status.as_u16(), body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_construction() {
        assert_eq!(
            api_url("https://gitlab.com/", "/projects/1/jobs/2"),
            "https://gitlab.com/api/v4/projects/1/jobs/2"
        );
        assert_eq!(
            api_url("https://gitlab.example.com", "/projects/1"),
            "https://gitlab.example.com/api/v4/projects/1"
        );
    }

    #[test]
    fn test_error_message_prefers_gitlab_message() {
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"message":"body is missing"}"#),
            "body is missing"
        );
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"message":{"base":["nope"]}}"#),
            r#"{"base":["nope"]}"#
        );
        assert_eq!(
            error_message(StatusCode::NOT_FOUND, r#"{"message":"404 Not found"}"#),
            "Resource not found"
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "upstream"),
            "Request failed (502): upstream"
        );
    }

    #[test]
    fn test_job_deserializes_null_coverage() {
        let job: GitLabJob =
            serde_json::from_str(r#"{"id": 7, "status": "success", "coverage": null}"#).unwrap();
        assert_eq!(job.coverage, None);

        let job: GitLabJob = serde_json::from_str(r#"{"id": 7, "coverage": 81.25}"#).unwrap();
        assert_eq!(job.coverage, Some(81.25));
    }

    #[test]
    fn test_commit_deserializes_parents() {
        let commit: GitLabCommit = serde_json::from_str(
            r#"{"id": "c2", "short_id": "c2", "title": "Add tests", "parent_ids": ["c1"]}"#,
        )
        .unwrap();
        assert_eq!(commit.parent_ids, vec!["c1".to_string()]);
    }

    #[test]
    fn test_client_rejects_invalid_token() {
        let result = GitLabClient::new(GitLabClientConfig {
            base_url: "https://gitlab.com".to_string(),
            token: "bad\ntoken".to_string(),
            timeout_secs: 30,
        });
        assert!(matches!(result, Err(AppError::Authentication { .. })));
    }
}
