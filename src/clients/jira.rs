//! Jira REST API v3 client.
//!
//! Authenticates with basic auth (account email + API token). Issue search uses
//! the enhanced JQL endpoint (`POST /search/jql`), not the deprecated `/search`.

use async_trait::async_trait;
use devboard_common::{AdfNode, Ticket};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ClientError, IssueTracker, decode_response, ensure_success};
use crate::config::JiraSection;
use crate::linking;

const SERVICE: &str = "Jira";

const MY_ISSUES_JQL: &str =
    "assignee = currentUser() AND statusCategory != Done ORDER BY updated DESC";

/// Fields requested for every issue the dashboard displays.
const ISSUE_FIELDS: &[&str] = &[
    "summary",
    "status",
    "description",
    "parent",
    "subtasks",
    "attachment",
    "assignee",
    "issuetype",
    "priority",
    "created",
    "updated",
];

const SPRINT_LIMIT: u32 = 100;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JqlSearchRequest<'a> {
    jql: &'a str,
    max_results: u32,
    fields: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct JqlSearchResponse {
    #[serde(default)]
    issues: Vec<Ticket>,
}

#[derive(Debug, Deserialize)]
struct TransitionsResponse {
    #[serde(default)]
    transitions: Vec<Transition>,
}

#[derive(Debug, Deserialize)]
struct Transition {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    to: Option<TransitionTarget>,
}

#[derive(Debug, Deserialize)]
struct TransitionTarget {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Myself {
    account_id: String,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    #[serde(default)]
    id: String,
}

/// Jira REST API v3 client.
pub struct JiraClient {
    client: reqwest::Client,
    base_url: String,
    email: String,
    api_token: String,
    sprint_jql: String,
}

impl std::fmt::Debug for JiraClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JiraClient")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("api_token", &"[REDACTED]")
            .finish()
    }
}

/// Turn `acme.atlassian.net`, `https://acme.atlassian.net/` etc. into the v3 API root.
pub fn api_base_url(host: &str) -> String {
    let host = host.trim();
    let normalized = if host.starts_with("https://") || host.starts_with("http://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };
    format!("{}/rest/api/3", normalized.trim_end_matches('/'))
}

/// Find a transition whose name, or target status name, matches `target` case-insensitively.
fn find_transition<'a>(transitions: &'a [Transition], target: &str) -> Option<&'a Transition> {
    let target = target.to_lowercase();
    transitions.iter().find(|t| {
        t.name.to_lowercase() == target
            || t.to
                .as_ref()
                .is_some_and(|to| to.name.to_lowercase() == target)
    })
}

/// `issue/{key}` plus `suffix`, refusing anything that isn't exactly one issue key.
fn issue_path(key: &str, suffix: &str) -> Result<String, ClientError> {
    if linking::extract_ticket_key(key).as_deref() != Some(key) {
        return Err(ClientError::InvalidIdentifier {
            kind: "issue key",
            value: key.to_string(),
        });
    }
    Ok(format!("issue/{key}{suffix}"))
}

fn describe_transitions(transitions: &[Transition]) -> String {
    transitions
        .iter()
        .map(|t| {
            let to = t.to.as_ref().map(|to| to.name.as_str()).unwrap_or("?");
            format!("{} → {}", t.name, to)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl JiraClient {
    /// Build a client from the `[jira]` settings section.
    pub fn from_settings(settings: &JiraSection, sprint_jql: String) -> Result<Self, ClientError> {
        let (Some(host), Some(email), Some(api_token)) = (
            settings.host.as_deref().filter(|v| !v.trim().is_empty()),
            settings.email.as_deref().filter(|v| !v.trim().is_empty()),
            settings.api_token.as_deref().filter(|v| !v.trim().is_empty()),
        ) else {
            return Err(ClientError::NotConfigured(SERVICE));
        };

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: api_base_url(host),
            email: email.to_string(),
            api_token: api_token.to_string(),
            sprint_jql,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .basic_auth(&self.email, Some(&self.api_token))
            .header("Accept", "application/json")
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self.request(reqwest::Method::GET, path).send().await?;
        decode_response(SERVICE, resp, path).await
    }

    async fn send_json<T, B>(&self, method: reqwest::Method, path: &str, body: &B) -> Result<T, ClientError>
    where
        T: serde::de::DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let resp = self.request(method, path).json(body).send().await?;
        decode_response(SERVICE, resp, path).await
    }

    async fn send_no_response<B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<(), ClientError> {
        let resp = self.request(method, path).json(body).send().await?;
        ensure_success(SERVICE, resp, path).await?;
        Ok(())
    }

    async fn current_account_id(&self) -> Result<String, ClientError> {
        let me: Myself = self.get("myself").await?;
        Ok(me.account_id)
    }
}

#[async_trait]
impl IssueTracker for JiraClient {
    async fn search_issues(&self, jql: &str, limit: u32) -> Result<Vec<Ticket>, ClientError> {
        debug!(jql, limit, "jira search");
        let body = JqlSearchRequest {
            jql,
            max_results: limit,
            fields: ISSUE_FIELDS,
        };
        let resp: JqlSearchResponse = self
            .send_json(reqwest::Method::POST, "search/jql", &body)
            .await?;
        Ok(resp.issues)
    }

    async fn active_sprint_issues(&self) -> Result<Vec<Ticket>, ClientError> {
        self.search_issues(&self.sprint_jql, SPRINT_LIMIT).await
    }

    async fn my_issues(&self) -> Result<Vec<Ticket>, ClientError> {
        self.search_issues(MY_ISSUES_JQL, SPRINT_LIMIT).await
    }

    async fn get_issue(&self, key: &str) -> Result<Ticket, ClientError> {
        let path = issue_path(key, &format!("?fields={}", ISSUE_FIELDS.join(",")))?;
        self.get(&path).await
    }

    async fn transition_issue_by_name(&self, key: &str, name: &str) -> Result<(), ClientError> {
        let path = issue_path(key, "/transitions")?;
        let resp: TransitionsResponse = self.get(&path).await?;
        let transition = find_transition(&resp.transitions, name).ok_or_else(|| {
            ClientError::NoTransition {
                target: name.to_string(),
                available: describe_transitions(&resp.transitions),
            }
        })?;

        let body = serde_json::json!({ "transition": { "id": transition.id } });
        self.send_no_response(reqwest::Method::POST, &path, &body).await
    }

    async fn update_issue_description(&self, key: &str, text: &str) -> Result<(), ClientError> {
        let path = issue_path(key, "")?;
        let body = serde_json::json!({
            "fields": { "description": AdfNode::doc_from_plain_text(text) }
        });
        self.send_no_response(reqwest::Method::PUT, &path, &body).await
    }

    async fn assign_to_self(&self, key: &str) -> Result<(), ClientError> {
        let path = issue_path(key, "/assignee")?;
        let account_id = self.current_account_id().await?;
        let body = serde_json::json!({ "accountId": account_id });
        self.send_no_response(reqwest::Method::PUT, &path, &body).await
    }

    async fn unassign_issue(&self, key: &str) -> Result<(), ClientError> {
        let path = issue_path(key, "/assignee")?;
        let body = serde_json::json!({ "accountId": null });
        self.send_no_response(reqwest::Method::PUT, &path, &body).await
    }

    async fn add_comment(&self, key: &str, text: &str) -> Result<String, ClientError> {
        let path = issue_path(key, "/comment")?;
        let body = serde_json::json!({ "body": AdfNode::doc_from_plain_text(text) });
        let resp: CommentResponse = self
            .send_json(reqwest::Method::POST, &path, &body)
            .await?;
        Ok(resp.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> JiraSection {
        JiraSection {
            host: Some("mycompany.atlassian.net".to_string()),
            email: Some("test@example.com".to_string()),
            api_token: Some("test-token".to_string()),
            sprint_jql: None,
        }
    }

    fn transitions() -> Vec<Transition> {
        serde_json::from_str::<TransitionsResponse>(
            r#"{"transitions":[
                {"id":"11","name":"Start work","to":{"name":"In Progress"}},
                {"id":"31","name":"Done","to":{"name":"Done"}}
            ]}"#,
        )
        .unwrap()
        .transitions
    }

    #[test]
    fn test_api_base_url_normalization() {
        assert_eq!(
            api_base_url("mycompany.atlassian.net"),
            "https://mycompany.atlassian.net/rest/api/3"
        );
        assert_eq!(
            api_base_url("https://mycompany.atlassian.net/"),
            "https://mycompany.atlassian.net/rest/api/3"
        );
        assert_eq!(
            api_base_url("http://localhost:8080"),
            "http://localhost:8080/rest/api/3"
        );
    }

    #[test]
    fn test_from_settings_requires_all_credentials() {
        let mut partial = settings();
        partial.api_token = Some("  ".to_string());
        let err = JiraClient::from_settings(&partial, String::new()).unwrap_err();
        assert!(matches!(err, ClientError::NotConfigured("Jira")));
        assert!(JiraClient::from_settings(&settings(), String::new()).is_ok());
    }

    #[test]
    fn test_debug_redacts_token() {
        let client = JiraClient::from_settings(&settings(), String::new()).unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("test-token"));
    }

    #[test]
    fn test_issue_path_accepts_only_issue_keys() {
        assert_eq!(issue_path("ABC-12", "/comment").unwrap(), "issue/ABC-12/comment");
        for bad in ["ABC-1/../myself", "abc-1", "ABC-1?fields=x", "myself", ""] {
            assert!(matches!(
                issue_path(bad, ""),
                Err(ClientError::InvalidIdentifier { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_invalid_key_is_rejected_before_any_request() {
        let client = JiraClient::from_settings(&settings(), String::new()).unwrap();
        let result = client.get_issue("ABC-1/../myself").await;
        assert!(matches!(result, Err(ClientError::InvalidIdentifier { .. })));
        let result = client.add_comment("ABC-1/../../serverInfo", "hi").await;
        assert!(matches!(result, Err(ClientError::InvalidIdentifier { .. })));
    }

    #[test]
    fn test_find_transition_by_name_or_target_status() {
        let transitions = transitions();
        assert_eq!(find_transition(&transitions, "start WORK").unwrap().id, "11");
        assert_eq!(find_transition(&transitions, "in progress").unwrap().id, "11");
        assert_eq!(find_transition(&transitions, "Done").unwrap().id, "31");
        assert!(find_transition(&transitions, "Blocked").is_none());
    }

    #[test]
    fn test_describe_transitions_lists_targets() {
        let text = describe_transitions(&transitions());
        assert_eq!(text, "Start work → In Progress, Done → Done");
    }

    #[test]
    fn test_search_response_tolerates_missing_issues() {
        let resp: JqlSearchResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.issues.is_empty());
    }
}
