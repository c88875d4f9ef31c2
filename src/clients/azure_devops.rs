use async_trait::async_trait;
use devboard_common::{IdentityRef, PullRequest, Reviewer};
use serde::{Deserialize, Serialize};

use super::{ClientError, CodeHost, decode_response, ensure_success};
use crate::config::AzureDevOpsSection;

const SERVICE: &str = "Azure DevOps";
const API_VERSION: &str = "7.1";
const POLICY_API_VERSION: &str = "7.1-preview.1";

/// Envelope used by every Azure DevOps list endpoint.
#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

/// Body accepted by `POST /api/prs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePullRequest {
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_draft: bool,
}

/// A branch-policy evaluation ("check") on a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvaluation {
    #[serde(default)]
    pub evaluation_id: String,
    /// approved, rejected, running, queued, notApplicable, broken
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub configuration: Option<PolicyConfiguration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfiguration {
    #[serde(default)]
    pub is_blocking: bool,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default, rename = "type")]
    pub policy_type: Option<PolicyType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyType {
    #[serde(default)]
    pub display_name: String,
}

/// A status posted to a pull request by CI or another service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestStatus {
    #[serde(default)]
    pub id: i64,
    /// succeeded, failed, pending, error, notSet, notApplicable
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub context: Option<StatusContext>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub creation_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusContext {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub genre: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentThread {
    pub id: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub thread_context: Option<ThreadContext>,
    #[serde(default)]
    pub comments: Vec<ThreadComment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadContext {
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadComment {
    pub id: i64,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub author: IdentityRef,
    /// text or system
    #[serde(default)]
    pub comment_type: Option<String>,
    #[serde(default)]
    pub published_date: Option<String>,
}

/// A person who can be added as a reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    #[serde(default, alias = "providerDisplayName")]
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub id: i64,
    #[serde(default)]
    pub build_number: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub source_branch: Option<String>,
    #[serde(default)]
    pub queue_time: Option<String>,
    #[serde(default)]
    pub finish_time: Option<String>,
    #[serde(default)]
    pub definition: Option<BuildDefinition>,
    #[serde(default, rename = "_links", skip_serializing)]
    links: Option<BuildLinks>,
    /// Browser URL, lifted out of `_links.web.href`.
    #[serde(default)]
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildDefinition {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct BuildLinks {
    #[serde(default)]
    web: Option<Href>,
}

#[derive(Debug, Clone, Deserialize)]
struct Href {
    href: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub total_tests: i64,
    #[serde(default)]
    pub passed_tests: i64,
    #[serde(default)]
    pub unanalyzed_tests: i64,
    #[serde(default)]
    pub started_date: Option<String>,
    #[serde(default)]
    pub completed_date: Option<String>,
    #[serde(default)]
    pub web_access_url: Option<String>,
}

/// Azure DevOps REST client scoped to one organization, project and repository.
pub struct AzureDevOpsClient {
    client: reqwest::Client,
    base_url: String,
    identities_url: String,
    repository: String,
    web_base: String,
    pat: String,
}

impl std::fmt::Debug for AzureDevOpsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureDevOpsClient")
            .field("base_url", &self.base_url)
            .field("repository", &self.repository)
            .field("pat", &"[REDACTED]")
            .finish()
    }
}

/// Browser URL for a pull request, preferring the repository web URL from the payload.
pub fn pull_request_web_url(pr: &PullRequest, fallback_repo_url: &str) -> String {
    let repo_url = pr
        .repository
        .as_ref()
        .and_then(|r| r.web_url.as_deref())
        .unwrap_or(fallback_repo_url);
    format!("{}/pullrequest/{}", repo_url.trim_end_matches('/'), pr.pull_request_id)
}

fn branch_ref(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{branch}")
    }
}

impl AzureDevOpsClient {
    /// Build a client from the `[azure_devops]` settings section.
    pub fn from_settings(settings: &AzureDevOpsSection) -> Result<Self, ClientError> {
        let present = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        let (Some(org), Some(project), Some(repository), Some(pat)) = (
            present(&settings.organization),
            present(&settings.project),
            present(&settings.repository),
            present(&settings.pat),
        ) else {
            return Err(ClientError::NotConfigured(SERVICE));
        };

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: format!("https://dev.azure.com/{org}/{project}/_apis"),
            identities_url: format!("https://vssps.dev.azure.com/{org}/_apis/identities"),
            web_base: format!("https://dev.azure.com/{org}/{project}/_git/{repository}"),
            repository,
            pat,
        })
    }

    fn pr_path(&self, id: i64) -> String {
        format!("git/repositories/{}/pullrequests/{}", self.repository, id)
    }

    /// Reviewer ids are identity GUIDs; anything else never reaches the URL.
    fn reviewer_path(&self, id: i64, reviewer_id: &str) -> Result<String, ClientError> {
        let valid = !reviewer_id.is_empty()
            && reviewer_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(ClientError::InvalidIdentifier {
                kind: "reviewer id",
                value: reviewer_id.to_string(),
            });
        }
        Ok(format!("{}/reviewers/{}", self.pr_path(id), reviewer_id))
    }

    fn request(&self, method: reqwest::Method, url: String, api_version: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth("", Some(&self.pat))
            .header("Accept", "application/json")
            .query(&[("api-version", api_version)])
    }

    fn api(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.request(method, format!("{}/{}", self.base_url, path), API_VERSION)
    }

    fn with_web_url(&self, mut pr: PullRequest) -> PullRequest {
        if pr.web_url.is_empty() {
            pr.web_url = pull_request_web_url(&pr, &self.web_base);
        }
        pr
    }

    async fn list<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ClientError> {
        let resp = self
            .api(reqwest::Method::GET, path)
            .query(query)
            .send()
            .await?;
        let list: ListResponse<T> = decode_response(SERVICE, resp, path).await?;
        Ok(list.value)
    }
}

#[async_trait]
impl CodeHost for AzureDevOpsClient {
    async fn active_pull_requests(&self) -> Result<Vec<PullRequest>, ClientError> {
        let path = format!("git/repositories/{}/pullrequests", self.repository);
        let prs: Vec<PullRequest> = self
            .list(&path, &[("searchCriteria.status", "active".to_string())])
            .await?;
        Ok(prs.into_iter().map(|pr| self.with_web_url(pr)).collect())
    }

    async fn get_pull_request(&self, id: i64) -> Result<PullRequest, ClientError> {
        let path = self.pr_path(id);
        let resp = self.api(reqwest::Method::GET, &path).send().await?;
        let pr: PullRequest = decode_response(SERVICE, resp, &path).await?;
        Ok(self.with_web_url(pr))
    }

    async fn create_pull_request(&self, req: &CreatePullRequest) -> Result<PullRequest, ClientError> {
        let path = format!("git/repositories/{}/pullrequests", self.repository);
        let body = serde_json::json!({
            "sourceRefName": branch_ref(&req.source_branch),
            "targetRefName": branch_ref(&req.target_branch),
            "title": req.title,
            "description": req.description.clone().unwrap_or_default(),
            "isDraft": req.is_draft,
        });
        let resp = self
            .api(reqwest::Method::POST, &path)
            .json(&body)
            .send()
            .await?;
        let pr: PullRequest = decode_response(SERVICE, resp, &path).await?;
        Ok(self.with_web_url(pr))
    }

    async fn update_pull_request_description(
        &self,
        id: i64,
        text: &str,
    ) -> Result<PullRequest, ClientError> {
        let path = self.pr_path(id);
        let resp = self
            .api(reqwest::Method::PATCH, &path)
            .json(&serde_json::json!({ "description": text }))
            .send()
            .await?;
        let pr: PullRequest = decode_response(SERVICE, resp, &path).await?;
        Ok(self.with_web_url(pr))
    }

    async fn pr_checks(&self, id: i64) -> Result<Vec<PolicyEvaluation>, ClientError> {
        // Policy evaluations are keyed by the project GUID, which only the PR payload carries.
        let pr = self.get_pull_request(id).await?;
        let project_id = pr
            .repository
            .as_ref()
            .and_then(|r| r.project.as_ref())
            .map(|p| p.id.clone())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ClientError::Decode {
                service: SERVICE,
                message: format!("pull request {id} has no project id"),
            })?;
        let artifact_id = format!("vstfs:///CodeReview/CodeReviewId/{project_id}/{id}");
        let path = "policy/evaluations";
        let resp = self
            .request(
                reqwest::Method::GET,
                format!("{}/{}", self.base_url, path),
                POLICY_API_VERSION,
            )
            .query(&[("artifactId", artifact_id)])
            .send()
            .await?;
        let list: ListResponse<PolicyEvaluation> = decode_response(SERVICE, resp, path).await?;
        Ok(list.value)
    }

    async fn pr_statuses(&self, id: i64) -> Result<Vec<PullRequestStatus>, ClientError> {
        self.list(&format!("{}/statuses", self.pr_path(id)), &[]).await
    }

    async fn pr_threads(&self, id: i64) -> Result<Vec<CommentThread>, ClientError> {
        let threads: Vec<CommentThread> =
            self.list(&format!("{}/threads", self.pr_path(id)), &[]).await?;
        Ok(threads.into_iter().filter(|t| !t.is_deleted).collect())
    }

    async fn add_reviewer(&self, id: i64, reviewer_id: &str) -> Result<Reviewer, ClientError> {
        let path = self.reviewer_path(id, reviewer_id)?;
        let resp = self
            .api(reqwest::Method::PUT, &path)
            .json(&serde_json::json!({ "vote": 0 }))
            .send()
            .await?;
        decode_response(SERVICE, resp, &path).await
    }

    async fn remove_reviewer(&self, id: i64, reviewer_id: &str) -> Result<(), ClientError> {
        let path = self.reviewer_path(id, reviewer_id)?;
        let resp = self.api(reqwest::Method::DELETE, &path).send().await?;
        ensure_success(SERVICE, resp, &path).await?;
        Ok(())
    }

    async fn search_reviewers(&self, query: &str) -> Result<Vec<Identity>, ClientError> {
        let resp = self
            .request(reqwest::Method::GET, self.identities_url.clone(), API_VERSION)
            .query(&[("searchFilter", "General"), ("filterValue", query)])
            .send()
            .await?;
        let list: ListResponse<Identity> = decode_response(SERVICE, resp, "identities").await?;
        Ok(list.value)
    }

    async fn list_builds(&self, limit: u32) -> Result<Vec<Build>, ClientError> {
        let builds: Vec<Build> = self
            .list(
                "build/builds",
                &[
                    ("$top", limit.to_string()),
                    ("queryOrder", "queueTimeDescending".to_string()),
                ],
            )
            .await?;
        Ok(builds
            .into_iter()
            .map(|mut build| {
                if build.web_url.is_none() {
                    build.web_url = build
                        .links
                        .as_ref()
                        .and_then(|l| l.web.as_ref())
                        .map(|w| w.href.clone());
                }
                build
            })
            .collect())
    }

    async fn list_test_runs(&self, limit: u32) -> Result<Vec<TestRun>, ClientError> {
        self.list("test/runs", &[("$top", limit.to_string())]).await
    }
}
