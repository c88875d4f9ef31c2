//! Upstream API clients.
//!
//! The dashboard core only talks to upstream systems through the
//! [`IssueTracker`] and [`CodeHost`] traits. Real implementations are
//! [`jira::JiraClient`] and [`azure_devops::AzureDevOpsClient`]; tests use the
//! in-memory fakes in `fake`.

pub mod azure_devops;
#[cfg(test)]
pub mod fake;
pub mod jira;

use async_trait::async_trait;
use devboard_common::{PullRequest, Reviewer, Ticket};
use reqwest::StatusCode;
use tracing::warn;

pub use azure_devops::{
    AzureDevOpsClient, Build, CommentThread, CreatePullRequest, Identity, PolicyEvaluation,
    PullRequestStatus, TestRun,
};
pub use jira::JiraClient;

/// Errors from upstream HTTP APIs.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("{service}: authentication failed (401), check the configured credentials")]
    AuthFailed { service: &'static str },

    #[error("{service}: permission denied (403)")]
    PermissionDenied { service: &'static str },

    #[error("{service}: not found (404): {path}")]
    NotFound { service: &'static str, path: String },

    #[error("{service} API error (HTTP {status}): {message}")]
    Http {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("Invalid {kind}: {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },

    #[error("No transition found to \"{target}\". Available: {available}")]
    NoTransition { target: String, available: String },

    #[error("Failed to decode {service} response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

/// Map a non-success upstream status to a [`ClientError`], embedding the body.
pub(crate) fn map_http_error(
    service: &'static str,
    status: StatusCode,
    path: &str,
    body: &str,
) -> ClientError {
    warn!(
        service,
        status = status.as_u16(),
        path,
        "upstream API error: {}",
        body
    );
    match status {
        StatusCode::UNAUTHORIZED => ClientError::AuthFailed { service },
        StatusCode::FORBIDDEN => ClientError::PermissionDenied { service },
        StatusCode::NOT_FOUND => ClientError::NotFound {
            service,
            path: path.to_string(),
        },
        _ => ClientError::Http {
            service,
            status: status.as_u16(),
            message: body.to_string(),
        },
    }
}

/// Read and decode a JSON response, mapping error statuses first.
pub(crate) async fn decode_response<T: serde::de::DeserializeOwned>(
    service: &'static str,
    resp: reqwest::Response,
    path: &str,
) -> Result<T, ClientError> {
    let resp = ensure_success(service, resp, path).await?;
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode {
        service,
        message: e.to_string(),
    })
}

/// Pass a successful response through, or turn it into a [`ClientError`].
pub(crate) async fn ensure_success(
    service: &'static str,
    resp: reqwest::Response,
    path: &str,
) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        let body = resp.text().await.unwrap_or_default();
        Err(map_http_error(service, status, path, &body))
    }
}

/// Issue-tracker operations the dashboard depends on.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn search_issues(&self, jql: &str, limit: u32) -> Result<Vec<Ticket>, ClientError>;

    async fn active_sprint_issues(&self) -> Result<Vec<Ticket>, ClientError>;

    async fn my_issues(&self) -> Result<Vec<Ticket>, ClientError>;

    async fn get_issue(&self, key: &str) -> Result<Ticket, ClientError>;

    async fn transition_issue_by_name(&self, key: &str, name: &str) -> Result<(), ClientError>;

    async fn update_issue_description(&self, key: &str, text: &str) -> Result<(), ClientError>;

    async fn assign_to_self(&self, key: &str) -> Result<(), ClientError>;

    async fn unassign_issue(&self, key: &str) -> Result<(), ClientError>;

    /// Add a comment and return the new comment's id.
    async fn add_comment(&self, key: &str, text: &str) -> Result<String, ClientError>;
}

/// Code-host (pull requests and CI) operations the dashboard depends on.
#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn active_pull_requests(&self) -> Result<Vec<PullRequest>, ClientError>;

    async fn get_pull_request(&self, id: i64) -> Result<PullRequest, ClientError>;

    async fn create_pull_request(&self, req: &CreatePullRequest) -> Result<PullRequest, ClientError>;

    async fn update_pull_request_description(
        &self,
        id: i64,
        text: &str,
    ) -> Result<PullRequest, ClientError>;

    async fn pr_checks(&self, id: i64) -> Result<Vec<PolicyEvaluation>, ClientError>;

    async fn pr_statuses(&self, id: i64) -> Result<Vec<PullRequestStatus>, ClientError>;

    async fn pr_threads(&self, id: i64) -> Result<Vec<CommentThread>, ClientError>;

    async fn add_reviewer(&self, id: i64, reviewer_id: &str) -> Result<Reviewer, ClientError>;

    async fn remove_reviewer(&self, id: i64, reviewer_id: &str) -> Result<(), ClientError>;

    async fn search_reviewers(&self, query: &str) -> Result<Vec<Identity>, ClientError>;

    async fn list_builds(&self, limit: u32) -> Result<Vec<Build>, ClientError>;

    async fn list_test_runs(&self, limit: u32) -> Result<Vec<TestRun>, ClientError>;
}
