//! Dashboard read/write paths over the upstream clients and the caches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use devboard_common::{PrWithTicket, PullRequest, Reviewer, Ticket, TicketWithPr};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheInfo, TimedCache};
use crate::clients::{
    AzureDevOpsClient, Build, CodeHost, CommentThread, CreatePullRequest, Identity, IssueTracker,
    JiraClient, PolicyEvaluation, PullRequestStatus, TestRun,
};
use crate::config::{Config, DevboardToml, MAX_POLL_INTERVAL_MINUTES, SettingsUpdate};
use crate::errors::DashboardError;
use crate::jobs::JobCommands;
use crate::linking;
use crate::notes::NotesStore;

pub const TICKETS_KEY: &str = "tickets";
pub const PRS_KEY: &str = "prs";

/// TTL used when polling is disabled.
const FALLBACK_TTL_MINUTES: i64 = 5;

pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Refreshed { tickets: usize, prs: usize },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheInfoResponse {
    pub tickets: Option<CacheInfo>,
    pub prs: Option<CacheInfo>,
}

#[derive(Default, Clone)]
struct Backends {
    tracker: Option<Arc<dyn IssueTracker>>,
    code_host: Option<Arc<dyn CodeHost>>,
}

impl Backends {
    fn from_settings(settings: &DevboardToml) -> Self {
        let tracker = match JiraClient::from_settings(&settings.jira, settings.sprint_jql()) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn IssueTracker>),
            Err(e) => {
                debug!("Jira client unavailable: {}", e);
                None
            }
        };
        let code_host = match AzureDevOpsClient::from_settings(&settings.azure_devops) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn CodeHost>),
            Err(e) => {
                debug!("Azure DevOps client unavailable: {}", e);
                None
            }
        };
        Self { tracker, code_host }
    }
}

pub struct DashboardService {
    config: Config,
    env: EnvLookup,
    file_settings: RwLock<DevboardToml>,
    settings: RwLock<DevboardToml>,
    backends: RwLock<Backends>,
    tickets: TimedCache<Vec<TicketWithPr>>,
    prs: TimedCache<Vec<PrWithTicket>>,
    background_refresh: AtomicBool,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl DashboardService {
    /// Build the service from loaded config, overlaying the process environment.
    pub fn new(config: Config) -> Self {
        Self::with_env(config, Arc::new(|key| std::env::var(key).ok()))
    }

    pub fn with_env(config: Config, env: EnvLookup) -> Self {
        let file_settings = config.file_settings.clone();
        let mut settings = file_settings.clone();
        settings.apply_env_overrides(|key| env(key));
        let backends = Backends::from_settings(&settings);
        Self::assemble(config, env, file_settings, settings, backends)
    }

    /// Build the service around explicit backends.
    pub fn with_backends(
        config: Config,
        tracker: Option<Arc<dyn IssueTracker>>,
        code_host: Option<Arc<dyn CodeHost>>,
    ) -> Self {
        let file_settings = config.file_settings.clone();
        let settings = file_settings.clone();
        Self::assemble(
            config,
            Arc::new(|_| None),
            file_settings,
            settings,
            Backends { tracker, code_host },
        )
    }

    fn assemble(
        config: Config,
        env: EnvLookup,
        file_settings: DevboardToml,
        settings: DevboardToml,
        backends: Backends,
    ) -> Self {
        Self {
            config,
            env,
            file_settings: RwLock::new(file_settings),
            settings: RwLock::new(settings),
            backends: RwLock::new(backends),
            tickets: TimedCache::new(),
            prs: TimedCache::new(),
            background_refresh: AtomicBool::new(false),
        }
    }

    // ── Settings ──────────────────────────────────────────────────────

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Effective settings: file values with the environment overlaid.
    pub fn settings(&self) -> DevboardToml {
        read(&self.settings).clone()
    }

    pub fn poll_interval_minutes(&self) -> u64 {
        read(&self.settings).polling.interval_minutes
    }

    fn cache_ttl_minutes(&self) -> i64 {
        match self.poll_interval_minutes() {
            0 => FALLBACK_TTL_MINUTES,
            minutes => minutes.min(MAX_POLL_INTERVAL_MINUTES) as i64,
        }
    }

    pub fn job_commands(&self) -> JobCommands {
        let settings = self.settings();
        let workdir = self.config.job_workdir(&settings);
        JobCommands::from_settings(&settings, workdir)
    }

    pub fn notes(&self) -> NotesStore {
        NotesStore::new(read(&self.settings).notes_dir())
    }

    /// Merge, persist and apply a settings update. Returns the masked result.
    pub fn update_settings(&self, update: SettingsUpdate) -> Result<DevboardToml, DashboardError> {
        let file_settings = {
            let mut file_settings = write(&self.file_settings);
            let mut merged = file_settings.clone();
            merged.merge(update);
            merged.save(&self.config.config_path)?;
            *file_settings = merged.clone();
            merged
        };

        let mut effective = file_settings;
        effective.apply_env_overrides(|key| (self.env)(key));
        *write(&self.backends) = Backends::from_settings(&effective);
        *write(&self.settings) = effective.clone();
        self.invalidate_caches();
        info!(path = %self.config.config_path.display(), "settings updated");
        Ok(effective.masked())
    }

    // ── Backends ──────────────────────────────────────────────────────

    fn tracker(&self) -> Result<Arc<dyn IssueTracker>, DashboardError> {
        read(&self.backends)
            .tracker
            .clone()
            .ok_or(DashboardError::NotConfigured { service: "Jira" })
    }

    fn code_host(&self) -> Result<Arc<dyn CodeHost>, DashboardError> {
        read(&self.backends)
            .code_host
            .clone()
            .ok_or(DashboardError::NotConfigured {
                service: "Azure DevOps",
            })
    }

    pub fn jira_configured(&self) -> bool {
        read(&self.backends).tracker.is_some()
    }

    pub fn azure_configured(&self) -> bool {
        read(&self.backends).code_host.is_some()
    }

    // ── Cache ─────────────────────────────────────────────────────────

    pub fn invalidate_caches(&self) {
        self.tickets.invalidate_all();
        self.prs.invalidate_all();
    }

    pub fn cache_info(&self) -> CacheInfoResponse {
        CacheInfoResponse {
            tickets: self.tickets.info(TICKETS_KEY),
            prs: self.prs.info(PRS_KEY),
        }
    }

    /// Fetch sprint tickets and active pull requests, join them both ways and cache the result.
    pub async fn refresh(&self) -> Result<RefreshOutcome, DashboardError> {
        let (tracker, code_host) = {
            let backends = read(&self.backends);
            (backends.tracker.clone(), backends.code_host.clone())
        };
        if tracker.is_none() && code_host.is_none() {
            info!("refresh skipped: no upstream credentials configured");
            return Ok(RefreshOutcome::Skipped {
                reason: "Jira and Azure DevOps are not configured".to_string(),
            });
        }

        let tickets = match &tracker {
            Some(tracker) => tracker.active_sprint_issues().await?,
            None => Vec::new(),
        };
        let prs = match &code_host {
            Some(code_host) => code_host.active_pull_requests().await?,
            None => Vec::new(),
        };

        let tickets_with_prs = linking::join_tickets_with_prs(tickets, &prs);
        let prs_with_tickets = match &tracker {
            Some(tracker) => {
                linking::join_prs_with_tickets(prs, |key| {
                    let tracker = tracker.clone();
                    async move { tracker.get_issue(&key).await }
                })
                .await
            }
            None => unlinked(prs),
        };

        let outcome = RefreshOutcome::Refreshed {
            tickets: tickets_with_prs.len(),
            prs: prs_with_tickets.len(),
        };
        let ttl = self.cache_ttl_minutes();
        self.tickets.set(TICKETS_KEY, tickets_with_prs, ttl);
        self.prs.set(PRS_KEY, prs_with_tickets, ttl);
        info!(?outcome, "dashboard refreshed");
        Ok(outcome)
    }

    /// Start a background refresh unless one triggered by a stale read is already running.
    fn refresh_in_background(self: &Arc<Self>) {
        if self.background_refresh.swap(true, Ordering::SeqCst) {
            return;
        }
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.refresh().await {
                warn!("background refresh failed: {}", e);
            }
            service.background_refresh.store(false, Ordering::SeqCst);
        });
    }

    /// Active pull requests from the cache, or from the code host when nothing is cached.
    async fn current_prs(&self) -> Result<Vec<PullRequest>, DashboardError> {
        if let Some(entry) = self.prs.get(PRS_KEY) {
            return Ok(entry.data.into_iter().map(|p| p.pull_request).collect());
        }
        match self.code_host() {
            Ok(code_host) => Ok(code_host.active_pull_requests().await?),
            Err(_) => Ok(Vec::new()),
        }
    }

    // ── Tickets ───────────────────────────────────────────────────────

    /// Sprint tickets with linked pull requests. Stale data is served while a refresh runs.
    pub async fn tickets_with_prs(self: &Arc<Self>) -> Result<Vec<TicketWithPr>, DashboardError> {
        if let Some(entry) = self.tickets.get(TICKETS_KEY) {
            if entry.is_expired() {
                self.refresh_in_background();
            }
            return Ok(entry.data);
        }
        if !self.jira_configured() {
            return Ok(Vec::new());
        }
        self.refresh().await?;
        Ok(self
            .tickets
            .get(TICKETS_KEY)
            .map(|entry| entry.data)
            .unwrap_or_default())
    }

    pub async fn my_tickets(&self) -> Result<Vec<TicketWithPr>, DashboardError> {
        let Ok(tracker) = self.tracker() else {
            return Ok(Vec::new());
        };
        let tickets = tracker.my_issues().await?;
        let prs = self.current_prs().await?;
        Ok(linking::join_tickets_with_prs(tickets, &prs))
    }

    pub async fn search_tickets(
        &self,
        jql: &str,
        limit: u32,
    ) -> Result<Vec<TicketWithPr>, DashboardError> {
        if jql.trim().is_empty() {
            return Err(DashboardError::BadRequest("jql must not be empty".into()));
        }
        let Ok(tracker) = self.tracker() else {
            return Ok(Vec::new());
        };
        let tickets = tracker.search_issues(jql, limit).await?;
        let prs = self.current_prs().await?;
        Ok(linking::join_tickets_with_prs(tickets, &prs))
    }

    pub async fn ticket(&self, key: &str) -> Result<TicketWithPr, DashboardError> {
        let ticket = self.tracker()?.get_issue(key).await?;
        let prs = self.current_prs().await?;
        // Same tie-break as the list join: the last referencing PR wins
        let linked_pr = prs
            .into_iter()
            .rev()
            .find(|pr| linking::extract_ticket_key_from_pr(pr).as_deref() == Some(ticket.key.as_str()));
        Ok(TicketWithPr { ticket, linked_pr })
    }

    pub async fn transition_ticket(&self, key: &str, name: &str) -> Result<Ticket, DashboardError> {
        let tracker = self.tracker()?;
        tracker.transition_issue_by_name(key, name).await?;
        self.invalidate_caches();
        Ok(tracker.get_issue(key).await?)
    }

    pub async fn update_ticket_description(&self, key: &str, text: &str) -> Result<(), DashboardError> {
        self.tracker()?.update_issue_description(key, text).await?;
        self.invalidate_caches();
        Ok(())
    }

    pub async fn assign_ticket(&self, key: &str) -> Result<(), DashboardError> {
        self.tracker()?.assign_to_self(key).await?;
        self.invalidate_caches();
        Ok(())
    }

    pub async fn unassign_ticket(&self, key: &str) -> Result<(), DashboardError> {
        self.tracker()?.unassign_issue(key).await?;
        self.invalidate_caches();
        Ok(())
    }

    pub async fn comment_on_ticket(&self, key: &str, text: &str) -> Result<String, DashboardError> {
        if text.trim().is_empty() {
            return Err(DashboardError::BadRequest("comment must not be empty".into()));
        }
        Ok(self.tracker()?.add_comment(key, text).await?)
    }

    // ── Pull requests ─────────────────────────────────────────────────

    /// Active pull requests with linked tickets. Stale data is served while a refresh runs.
    pub async fn prs_with_tickets(self: &Arc<Self>) -> Result<Vec<PrWithTicket>, DashboardError> {
        if let Some(entry) = self.prs.get(PRS_KEY) {
            if entry.is_expired() {
                self.refresh_in_background();
            }
            return Ok(entry.data);
        }
        if !self.azure_configured() {
            return Ok(Vec::new());
        }
        self.refresh().await?;
        Ok(self
            .prs
            .get(PRS_KEY)
            .map(|entry| entry.data)
            .unwrap_or_default())
    }

    pub async fn pull_request(&self, id: i64) -> Result<PrWithTicket, DashboardError> {
        let pr = self.code_host()?.get_pull_request(id).await?;
        Ok(self.link_ticket(pr).await)
    }

    async fn link_ticket(&self, pull_request: PullRequest) -> PrWithTicket {
        let linked_ticket = match (
            linking::extract_ticket_key_from_pr(&pull_request),
            self.tracker(),
        ) {
            (Some(key), Ok(tracker)) => match tracker.get_issue(&key).await {
                Ok(ticket) => Some(ticket),
                Err(e) => {
                    debug!(key = %key, "linked ticket fetch failed: {}", e);
                    None
                }
            },
            _ => None,
        };
        PrWithTicket {
            pull_request,
            linked_ticket,
        }
    }

    pub async fn create_pull_request(
        &self,
        req: &CreatePullRequest,
    ) -> Result<PrWithTicket, DashboardError> {
        if req.title.trim().is_empty() || req.source_branch.trim().is_empty() {
            return Err(DashboardError::BadRequest(
                "title and sourceBranch are required".into(),
            ));
        }
        let pr = self.code_host()?.create_pull_request(req).await?;
        self.invalidate_caches();
        Ok(self.link_ticket(pr).await)
    }

    pub async fn update_pr_description(&self, id: i64, text: &str) -> Result<PullRequest, DashboardError> {
        let pr = self.code_host()?.update_pull_request_description(id, text).await?;
        self.prs.invalidate(PRS_KEY);
        Ok(pr)
    }

    pub async fn pr_checks(&self, id: i64) -> Result<Vec<PolicyEvaluation>, DashboardError> {
        Ok(self.code_host()?.pr_checks(id).await?)
    }

    pub async fn pr_statuses(&self, id: i64) -> Result<Vec<PullRequestStatus>, DashboardError> {
        Ok(self.code_host()?.pr_statuses(id).await?)
    }

    pub async fn pr_threads(&self, id: i64) -> Result<Vec<CommentThread>, DashboardError> {
        Ok(self.code_host()?.pr_threads(id).await?)
    }

    pub async fn add_reviewer(&self, id: i64, reviewer_id: &str) -> Result<Reviewer, DashboardError> {
        let reviewer = self.code_host()?.add_reviewer(id, reviewer_id).await?;
        self.prs.invalidate(PRS_KEY);
        Ok(reviewer)
    }

    pub async fn remove_reviewer(&self, id: i64, reviewer_id: &str) -> Result<(), DashboardError> {
        self.code_host()?.remove_reviewer(id, reviewer_id).await?;
        self.prs.invalidate(PRS_KEY);
        Ok(())
    }

    pub async fn search_reviewers(&self, query: &str) -> Result<Vec<Identity>, DashboardError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        match self.code_host() {
            Ok(code_host) => Ok(code_host.search_reviewers(query).await?),
            Err(_) => Ok(Vec::new()),
        }
    }

    pub async fn builds(&self, limit: u32) -> Result<Vec<Build>, DashboardError> {
        match self.code_host() {
            Ok(code_host) => Ok(code_host.list_builds(limit).await?),
            Err(_) => Ok(Vec::new()),
        }
    }

    pub async fn test_runs(&self, limit: u32) -> Result<Vec<TestRun>, DashboardError> {
        match self.code_host() {
            Ok(code_host) => Ok(code_host.list_test_runs(limit).await?),
            Err(_) => Ok(Vec::new()),
        }
    }
}

fn unlinked(prs: Vec<PullRequest>) -> Vec<PrWithTicket> {
    prs.into_iter()
        .map(|pull_request| PrWithTicket {
            pull_request,
            linked_ticket: None,
        })
        .collect()
}
