//! In-memory `IssueTracker` and `CodeHost` used by unit and router tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use devboard_common::{IdentityRef, PullRequest, Reviewer, Ticket, TicketFields};

use super::{
    Build, ClientError, CodeHost, CommentThread, CreatePullRequest, Identity, IssueTracker,
    PolicyEvaluation, PullRequestStatus, TestRun,
};

pub fn ticket(key: &str, summary: &str) -> Ticket {
    let mut fields = TicketFields::default();
    fields.summary = summary.to_string();
    fields.status.name = "To Do".to_string();
    Ticket {
        id: key.to_string(),
        key: key.to_string(),
        fields,
    }
}

pub fn pull_request(id: i64, title: &str, source_branch: &str) -> PullRequest {
    PullRequest {
        pull_request_id: id,
        title: title.to_string(),
        description: None,
        source_ref_name: format!("refs/heads/{source_branch}"),
        target_ref_name: "refs/heads/main".to_string(),
        status: "active".to_string(),
        created_by: IdentityRef {
            id: "u1".to_string(),
            display_name: "Sam Doe".to_string(),
            unique_name: None,
        },
        creation_date: None,
        is_draft: false,
        merge_status: None,
        reviewers: Vec::new(),
        repository: None,
        web_url: format!("https://dev.azure.test/pullrequest/{id}"),
    }
}

fn not_found(service: &'static str, path: String) -> ClientError {
    ClientError::NotFound { service, path }
}

/// Issue tracker backed by a ticket list. Keys in `failing` make `get_issue` fail.
#[derive(Default)]
pub struct FakeTracker {
    pub tickets: Mutex<Vec<Ticket>>,
    pub failing: Mutex<HashSet<String>>,
    pub comments: Mutex<Vec<(String, String)>>,
    pub get_calls: AtomicUsize,
}

impl FakeTracker {
    pub fn with_tickets(tickets: Vec<Ticket>) -> Self {
        Self {
            tickets: Mutex::new(tickets),
            ..Default::default()
        }
    }

    pub fn fail_key(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    fn find(&self, key: &str) -> Result<Ticket, ClientError> {
        self.tickets
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.key == key)
            .cloned()
            .ok_or_else(|| not_found("Jira", format!("issue/{key}")))
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn search_issues(&self, _jql: &str, limit: u32) -> Result<Vec<Ticket>, ClientError> {
        let tickets = self.tickets.lock().unwrap();
        Ok(tickets.iter().take(limit as usize).cloned().collect())
    }

    async fn active_sprint_issues(&self) -> Result<Vec<Ticket>, ClientError> {
        Ok(self.tickets.lock().unwrap().clone())
    }

    async fn my_issues(&self) -> Result<Vec<Ticket>, ClientError> {
        Ok(self.tickets.lock().unwrap().clone())
    }

    async fn get_issue(&self, key: &str) -> Result<Ticket, ClientError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(key) {
            return Err(ClientError::Http {
                service: "Jira",
                status: 500,
                message: "boom".to_string(),
            });
        }
        self.find(key)
    }

    async fn transition_issue_by_name(&self, key: &str, name: &str) -> Result<(), ClientError> {
        let mut tickets = self.tickets.lock().unwrap();
        let ticket = tickets
            .iter_mut()
            .find(|t| t.key == key)
            .ok_or_else(|| not_found("Jira", format!("issue/{key}")))?;
        ticket.fields.status.name = name.to_string();
        Ok(())
    }

    async fn update_issue_description(&self, key: &str, _text: &str) -> Result<(), ClientError> {
        self.find(key).map(|_| ())
    }

    async fn assign_to_self(&self, key: &str) -> Result<(), ClientError> {
        self.find(key).map(|_| ())
    }

    async fn unassign_issue(&self, key: &str) -> Result<(), ClientError> {
        self.find(key).map(|_| ())
    }

    async fn add_comment(&self, key: &str, text: &str) -> Result<String, ClientError> {
        self.find(key)?;
        let mut comments = self.comments.lock().unwrap();
        comments.push((key.to_string(), text.to_string()));
        Ok(comments.len().to_string())
    }
}

/// Code host backed by a pull-request list.
#[derive(Default)]
pub struct FakeCodeHost {
    pub prs: Mutex<Vec<PullRequest>>,
    pub list_calls: AtomicUsize,
}

impl FakeCodeHost {
    pub fn with_prs(prs: Vec<PullRequest>) -> Self {
        Self {
            prs: Mutex::new(prs),
            ..Default::default()
        }
    }

    fn find(&self, id: i64) -> Result<PullRequest, ClientError> {
        self.prs
            .lock()
            .unwrap()
            .iter()
            .find(|pr| pr.pull_request_id == id)
            .cloned()
            .ok_or_else(|| not_found("Azure DevOps", format!("pullrequests/{id}")))
    }
}

#[async_trait]
impl CodeHost for FakeCodeHost {
    async fn active_pull_requests(&self) -> Result<Vec<PullRequest>, ClientError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.prs.lock().unwrap().clone())
    }

    async fn get_pull_request(&self, id: i64) -> Result<PullRequest, ClientError> {
        self.find(id)
    }

    async fn create_pull_request(&self, req: &CreatePullRequest) -> Result<PullRequest, ClientError> {
        let mut prs = self.prs.lock().unwrap();
        let id = prs.iter().map(|pr| pr.pull_request_id).max().unwrap_or(0) + 1;
        let mut pr = pull_request(id, &req.title, &req.source_branch);
        pr.description = req.description.clone();
        pr.is_draft = req.is_draft;
        prs.push(pr.clone());
        Ok(pr)
    }

    async fn update_pull_request_description(
        &self,
        id: i64,
        text: &str,
    ) -> Result<PullRequest, ClientError> {
        let mut prs = self.prs.lock().unwrap();
        let pr = prs
            .iter_mut()
            .find(|pr| pr.pull_request_id == id)
            .ok_or_else(|| not_found("Azure DevOps", format!("pullrequests/{id}")))?;
        pr.description = Some(text.to_string());
        Ok(pr.clone())
    }

    async fn pr_checks(&self, id: i64) -> Result<Vec<PolicyEvaluation>, ClientError> {
        self.find(id).map(|_| Vec::new())
    }

    async fn pr_statuses(&self, id: i64) -> Result<Vec<PullRequestStatus>, ClientError> {
        self.find(id).map(|_| Vec::new())
    }

    async fn pr_threads(&self, id: i64) -> Result<Vec<CommentThread>, ClientError> {
        self.find(id).map(|_| Vec::new())
    }

    async fn add_reviewer(&self, id: i64, reviewer_id: &str) -> Result<Reviewer, ClientError> {
        self.find(id)?;
        Ok(Reviewer {
            id: reviewer_id.to_string(),
            display_name: reviewer_id.to_string(),
            vote: 0,
            is_required: false,
        })
    }

    async fn remove_reviewer(&self, id: i64, _reviewer_id: &str) -> Result<(), ClientError> {
        self.find(id).map(|_| ())
    }

    async fn search_reviewers(&self, query: &str) -> Result<Vec<Identity>, ClientError> {
        Ok(vec![Identity {
            id: format!("id-{query}"),
            display_name: query.to_string(),
        }])
    }

    async fn list_builds(&self, _limit: u32) -> Result<Vec<Build>, ClientError> {
        Ok(Vec::new())
    }

    async fn list_test_runs(&self, _limit: u32) -> Result<Vec<TestRun>, ClientError> {
        Ok(Vec::new())
    }
}
