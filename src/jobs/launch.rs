//! Command construction and outcome interpretation for each job kind.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use devboard_common::{Job, JobKind, JobStatus};
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use super::process::{self, CommandSpec, LineSink};
use super::tracker::JobTracker;
use crate::config::DevboardToml;
use crate::errors::DashboardError;

// Reporter summary lines only, e.g. "  8 passed (14.2s)"
static SUMMARY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+) (passed|failed|flaky|skipped)\b").unwrap());

/// Request bodies for `POST /api/jobs/{kind}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiJobRequest {
    pub target: String,
    pub prompt: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaywrightJobRequest {
    #[serde(default = "default_playwright_target")]
    pub target: String,
    #[serde(default)]
    pub spec: Option<String>,
    #[serde(default)]
    pub grep: Option<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

fn default_playwright_target() -> String {
    "e2e".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployJobRequest {
    pub target: String,
    #[serde(default)]
    pub environment: Option<String>,
}

#[derive(Debug, Clone)]
pub enum LaunchRequest {
    Ai(AiJobRequest),
    Playwright(PlaywrightJobRequest),
    Deploy(DeployJobRequest),
}

impl LaunchRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Ai(_) => JobKind::Ai,
            Self::Playwright(_) => JobKind::Playwright,
            Self::Deploy(_) => JobKind::Deploy,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Self::Ai(r) => &r.target,
            Self::Playwright(r) => &r.target,
            Self::Deploy(r) => &r.target,
        }
    }
}

/// The commands jobs run, resolved from settings at launch time.
#[derive(Debug, Clone, PartialEq)]
pub struct JobCommands {
    pub claude_cmd: String,
    pub playwright_cmd: String,
    pub deploy_cmd: Option<String>,
    pub workdir: PathBuf,
}

impl JobCommands {
    pub fn from_settings(settings: &DevboardToml, workdir: PathBuf) -> Self {
        Self {
            claude_cmd: settings.claude_cmd(),
            playwright_cmd: settings.playwright_cmd(),
            deploy_cmd: settings
                .jobs
                .deploy_cmd
                .clone()
                .filter(|c| !c.trim().is_empty()),
            workdir,
        }
    }

    fn resolve_cwd(&self, cwd: &Option<PathBuf>) -> PathBuf {
        match cwd {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.workdir.join(dir),
            None => self.workdir.clone(),
        }
    }

    /// Build the command line for a launch request.
    pub fn command_for(&self, request: &LaunchRequest) -> Result<CommandSpec, DashboardError> {
        match request {
            LaunchRequest::Ai(req) => {
                if req.prompt.trim().is_empty() {
                    return Err(DashboardError::BadRequest("prompt must not be empty".into()));
                }
                Ok(CommandSpec::new(&self.claude_cmd, self.resolve_cwd(&req.cwd))
                    .arg("--print")
                    .arg("--dangerously-skip-permissions")
                    .arg("-p")
                    .arg(&req.prompt)
                    .env("NO_COLOR", "1"))
            }
            LaunchRequest::Playwright(req) => {
                let mut spec = CommandSpec::new(&self.playwright_cmd, self.resolve_cwd(&req.cwd))
                    .arg("playwright")
                    .arg("test");
                if let Some(file) = req.spec.as_deref().filter(|s| !s.trim().is_empty()) {
                    spec = spec.arg(file);
                }
                if let Some(grep) = req.grep.as_deref().filter(|g| !g.trim().is_empty()) {
                    spec = spec.arg("--grep").arg(grep);
                }
                Ok(spec
                    .arg("--reporter=line")
                    .env("NO_COLOR", "1")
                    .env("FORCE_COLOR", "0"))
            }
            LaunchRequest::Deploy(req) => {
                let deploy_cmd = self.deploy_cmd.as_deref().ok_or_else(|| {
                    DashboardError::BadRequest("jobs.deploy_cmd is not configured".into())
                })?;
                Ok(CommandSpec::new("sh", &self.workdir)
                    .arg("-c")
                    .arg(deploy_cmd)
                    .env("DEPLOY_TARGET", &req.target)
                    .env(
                        "DEPLOY_ENVIRONMENT",
                        req.environment.clone().unwrap_or_default(),
                    )
                    .env("NO_COLOR", "1"))
            }
        }
    }
}

/// Test counts from Playwright's final summary lines.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlaywrightSummary {
    pub passed: u32,
    pub failed: u32,
    pub flaky: u32,
    pub skipped: u32,
}

impl PlaywrightSummary {
    /// Scan output for summary lines starting with `N passed` / `N failed` /
    /// `N flaky` / `N skipped`; later lines win.
    pub fn parse(lines: &[String]) -> Self {
        let mut summary = Self::default();
        for line in lines {
            let Some(caps) = SUMMARY_REGEX.captures(line) else {
                continue;
            };
            let Ok(count) = caps[1].parse::<u32>() else {
                continue;
            };
            match &caps[2] {
                "passed" => summary.passed = count,
                "failed" => summary.failed = count,
                "flaky" => summary.flaky = count,
                "skipped" => summary.skipped = count,
                _ => {}
            }
        }
        summary
    }

    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.flaky + self.skipped
    }
}

impl std::fmt::Display for PlaywrightSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} flaky, {} skipped",
            self.passed, self.failed, self.flaky, self.skipped
        )
    }
}

/// Decide the final status from the exit code and captured output.
pub fn interpret_outcome(
    kind: JobKind,
    exit_code: Option<i32>,
    output: &[String],
) -> (JobStatus, Option<String>) {
    let exit_error = || match exit_code {
        Some(code) => format!("Process exited with code {}", code),
        None => "Process terminated by signal".to_string(),
    };

    match kind {
        JobKind::Playwright => {
            let summary = PlaywrightSummary::parse(output);
            if exit_code == Some(0) && summary.failed == 0 {
                (JobStatus::Completed, None)
            } else if summary.failed > 0 {
                (
                    JobStatus::Failed,
                    Some(format!("{} test(s) failed", summary.failed)),
                )
            } else {
                (JobStatus::Failed, Some(exit_error()))
            }
        }
        JobKind::Ai | JobKind::Deploy => {
            if exit_code == Some(0) {
                (JobStatus::Completed, None)
            } else {
                (JobStatus::Failed, Some(exit_error()))
            }
        }
    }
}

/// Starts jobs in the background and drives them through the tracker.
#[derive(Clone)]
pub struct JobLauncher {
    tracker: Arc<JobTracker>,
}

impl JobLauncher {
    pub fn new(tracker: Arc<JobTracker>) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Create a job and start it on a background task. Returns the pending job.
    pub fn launch(
        &self,
        request: LaunchRequest,
        commands: &JobCommands,
    ) -> Result<Job, DashboardError> {
        let spec = commands.command_for(&request)?;
        let kind = request.kind();
        let job = self.tracker.create_job(kind, request.target());
        tokio::spawn(run_job(self.tracker.clone(), job.id.clone(), kind, spec));
        Ok(job)
    }
}

async fn run_job(tracker: Arc<JobTracker>, job_id: String, kind: JobKind, spec: CommandSpec) {
    if !tracker.update_status(&job_id, JobStatus::Running, None) {
        return;
    }
    info!(job_id = %job_id, command = %spec.display(), "starting job");

    let sink: LineSink = {
        let tracker = tracker.clone();
        let job_id = job_id.clone();
        Arc::new(move |line| {
            tracker.append_output(&job_id, line);
        })
    };

    let (handle, exit) = match process::spawn(&spec, sink) {
        Ok(spawned) => spawned,
        Err(e) => {
            warn!(job_id = %job_id, "failed to spawn {}: {}", spec.program, e);
            tracker.update_status(
                &job_id,
                JobStatus::Failed,
                Some(format!("Failed to spawn {}: {}", spec.program, e)),
            );
            return;
        }
    };
    tracker.register_process(&job_id, handle);

    let result = exit.await;
    tracker.unregister_process(&job_id);

    match result {
        Ok(code) => {
            if let Some(code) = code {
                tracker.set_exit_code(&job_id, code);
            }
            let output = tracker.get(&job_id).map(|j| j.output).unwrap_or_default();
            if kind == JobKind::Playwright {
                let summary = PlaywrightSummary::parse(&output);
                if summary.total() > 0 {
                    tracker.append_output(&job_id, format!("Summary: {}", summary));
                }
            }
            let (status, error) = interpret_outcome(kind, code, &output);
            tracker.update_status(&job_id, status, error);
        }
        Err(e) => {
            tracker.update_status(
                &job_id,
                JobStatus::Failed,
                Some(format!("Failed waiting for process: {}", e)),
            );
        }
    }
}
