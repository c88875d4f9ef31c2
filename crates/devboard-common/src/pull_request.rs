use serde::{Deserialize, Serialize};

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// A pull request, shaped like an Azure DevOps `GitPullRequest`.
///
/// `web_url` is not part of the upstream payload; the client fills it in from
/// the repository web URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub pull_request_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source_ref_name: String,
    #[serde(default)]
    pub target_ref_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_by: IdentityRef,
    #[serde(default)]
    pub creation_date: Option<String>,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub merge_status: Option<String>,
    #[serde(default)]
    pub reviewers: Vec<Reviewer>,
    #[serde(default)]
    pub repository: Option<RepositoryRef>,
    #[serde(default)]
    pub web_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub unique_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reviewer {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    /// 10 approved, 5 approved with suggestions, 0 no vote, -5 waiting, -10 rejected.
    #[serde(default)]
    pub vote: i32,
    #[serde(default)]
    pub is_required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub project: Option<ProjectRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Strip a `refs/heads/` prefix if present.
pub fn short_branch_name(ref_name: &str) -> &str {
    ref_name.strip_prefix(BRANCH_REF_PREFIX).unwrap_or(ref_name)
}

impl PullRequest {
    pub fn source_branch(&self) -> &str {
        short_branch_name(&self.source_ref_name)
    }

    pub fn target_branch(&self) -> &str {
        short_branch_name(&self.target_ref_name)
    }
}
