//! Dashboard configuration.
//!
//! Settings live in `.devboard/config.toml` under the project directory and are
//! layered: file → environment (including `.env`, loaded by `main`) → CLI flags.
//!
//! ```toml
//! [jira]
//! host = "yourcompany.atlassian.net"
//! email = "me@example.com"
//! api_token = "..."
//!
//! [azure_devops]
//! organization = "myorg"
//! project = "MyProject"
//! repository = "my-repo"
//! pat = "..."
//!
//! [polling]
//! interval_minutes = 5
//!
//! [notes]
//! dir = "/home/me/notes"
//!
//! [jobs]
//! claude_cmd = "claude"
//! playwright_cmd = "npx"
//! workdir = "."
//! deploy_cmd = "./scripts/deploy.sh"
//!
//! [server]
//! port = 4200
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEVBOARD_DIR: &str = ".devboard";
pub const CONFIG_FILE: &str = "config.toml";

/// Placeholder returned instead of stored secrets.
pub const SECRET_MASK: &str = "********";

/// Longest accepted poll interval (one year). Larger values are clamped.
pub const MAX_POLL_INTERVAL_MINUTES: u64 = 60 * 24 * 365;

fn clamp_interval(minutes: u64) -> u64 {
    if minutes > MAX_POLL_INTERVAL_MINUTES {
        warn!(
            minutes,
            max = MAX_POLL_INTERVAL_MINUTES,
            "poll interval too large, clamping"
        );
        MAX_POLL_INTERVAL_MINUTES
    } else {
        minutes
    }
}

const DEFAULT_SPRINT_JQL: &str =
    "sprint in openSprints() AND assignee = currentUser() ORDER BY rank";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JiraSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// JQL used for the sprint board.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprint_jql: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzureDevOpsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pat: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingSection {
    /// Minutes between background refreshes. Zero disables polling.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
}

fn default_interval_minutes() -> u64 {
    5
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotesSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playwright_cmd: Option<String>,
    /// Working directory for spawned jobs (defaults to the project directory).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_cmd: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    4200
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// The complete config.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevboardToml {
    #[serde(default)]
    pub jira: JiraSection,
    #[serde(default)]
    pub azure_devops: AzureDevOpsSection,
    #[serde(default)]
    pub polling: PollingSection,
    #[serde(default)]
    pub notes: NotesSection,
    #[serde(default)]
    pub jobs: JobsSection,
    #[serde(default)]
    pub server: ServerSection,
}

/// Partial settings update accepted by `PUT /api/settings`.
///
/// Absent or blank fields keep the stored value, and so does a secret that
/// still carries [`SECRET_MASK`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub jira: Option<JiraSection>,
    #[serde(default)]
    pub azure_devops: Option<AzureDevOpsSection>,
    #[serde(default)]
    pub polling_interval_minutes: Option<u64>,
    #[serde(default)]
    pub notes_dir: Option<PathBuf>,
    #[serde(default)]
    pub jobs: Option<JobsSection>,
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn merge_field(target: &mut Option<String>, update: Option<String>) {
    if let Some(value) = update {
        let value = value.trim().to_string();
        if !value.is_empty() && value != SECRET_MASK {
            *target = Some(value);
        }
    }
}

fn mask(value: &mut Option<String>) {
    if is_set(value) {
        *value = Some(SECRET_MASK.to_string());
    }
}

impl DevboardToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).context("Failed to parse config.toml")?;
        config.polling.interval_minutes = clamp_interval(config.polling.interval_minutes);
        Ok(config)
    }

    /// Load `config.toml` from `devboard_dir`, or defaults if it doesn't exist.
    pub fn load_or_default(devboard_dir: &Path) -> Result<Self> {
        let path = devboard_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Overlay environment variables, read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let overlay = |target: &mut Option<String>, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *target = Some(value);
            }
        };
        overlay(&mut self.jira.host, "JIRA_HOST");
        overlay(&mut self.jira.email, "JIRA_EMAIL");
        overlay(&mut self.jira.api_token, "JIRA_API_TOKEN");
        overlay(&mut self.azure_devops.organization, "AZURE_DEVOPS_ORG");
        overlay(&mut self.azure_devops.project, "AZURE_DEVOPS_PROJECT");
        overlay(&mut self.azure_devops.repository, "AZURE_DEVOPS_REPO");
        overlay(&mut self.azure_devops.pat, "AZURE_DEVOPS_PAT");
        overlay(&mut self.jobs.claude_cmd, "CLAUDE_CMD");

        if let Some(raw) = lookup("DEVBOARD_POLL_INTERVAL") {
            match raw.trim().parse::<u64>() {
                Ok(minutes) => self.polling.interval_minutes = clamp_interval(minutes),
                Err(_) => warn!(value = %raw, "ignoring invalid DEVBOARD_POLL_INTERVAL"),
            }
        }
        if let Some(dir) = lookup("DEVBOARD_NOTES_DIR").filter(|v| !v.trim().is_empty()) {
            self.notes.dir = Some(PathBuf::from(dir));
        }
    }

    /// Overlay the process environment.
    pub fn with_process_env(mut self) -> Self {
        self.apply_env_overrides(|key| std::env::var(key).ok());
        self
    }

    pub fn jira_ready(&self) -> bool {
        is_set(&self.jira.host) && is_set(&self.jira.email) && is_set(&self.jira.api_token)
    }

    pub fn azure_ready(&self) -> bool {
        is_set(&self.azure_devops.organization)
            && is_set(&self.azure_devops.project)
            && is_set(&self.azure_devops.repository)
            && is_set(&self.azure_devops.pat)
    }

    pub fn sprint_jql(&self) -> String {
        self.jira
            .sprint_jql
            .clone()
            .filter(|jql| !jql.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SPRINT_JQL.to_string())
    }

    /// Notes directory, falling back to `~/.devboard/notes`.
    pub fn notes_dir(&self) -> PathBuf {
        self.notes.dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEVBOARD_DIR)
                .join("notes")
        })
    }

    pub fn claude_cmd(&self) -> String {
        self.jobs
            .claude_cmd
            .clone()
            .unwrap_or_else(|| "claude".to_string())
    }

    pub fn playwright_cmd(&self) -> String {
        self.jobs
            .playwright_cmd
            .clone()
            .unwrap_or_else(|| "npx".to_string())
    }

    /// Apply a partial update from the settings endpoint.
    pub fn merge(&mut self, update: SettingsUpdate) {
        if let Some(jira) = update.jira {
            merge_field(&mut self.jira.host, jira.host);
            merge_field(&mut self.jira.email, jira.email);
            merge_field(&mut self.jira.api_token, jira.api_token);
            merge_field(&mut self.jira.sprint_jql, jira.sprint_jql);
        }
        if let Some(azure) = update.azure_devops {
            merge_field(&mut self.azure_devops.organization, azure.organization);
            merge_field(&mut self.azure_devops.project, azure.project);
            merge_field(&mut self.azure_devops.repository, azure.repository);
            merge_field(&mut self.azure_devops.pat, azure.pat);
        }
        if let Some(minutes) = update.polling_interval_minutes {
            self.polling.interval_minutes = clamp_interval(minutes);
        }
        if let Some(dir) = update.notes_dir.filter(|d| !d.as_os_str().is_empty()) {
            self.notes.dir = Some(dir);
        }
        if let Some(jobs) = update.jobs {
            merge_field(&mut self.jobs.claude_cmd, jobs.claude_cmd);
            merge_field(&mut self.jobs.playwright_cmd, jobs.playwright_cmd);
            merge_field(&mut self.jobs.deploy_cmd, jobs.deploy_cmd);
            if let Some(dir) = jobs.workdir.filter(|d| !d.as_os_str().is_empty()) {
                self.jobs.workdir = Some(dir);
            }
        }
    }

    /// Copy with every stored secret replaced by [`SECRET_MASK`].
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        mask(&mut copy.jira.api_token);
        mask(&mut copy.azure_devops.pat);
        copy
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.jira_ready() {
            warnings.push(
                "Jira is not configured: set jira.host, jira.email and jira.api_token".to_string(),
            );
        }
        if !self.azure_ready() {
            warnings.push(
                "Azure DevOps is not configured: set azure_devops.organization, project, repository and pat"
                    .to_string(),
            );
        }
        if self.polling.interval_minutes == 0 {
            warnings.push("polling.interval_minutes is 0: background refresh is disabled".to_string());
        }
        warnings
    }
}

/// Resolved paths plus the settings as stored on disk.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub devboard_dir: PathBuf,
    pub config_path: PathBuf,
    pub log_dir: PathBuf,
    /// Settings exactly as read from `config.toml`, without environment overrides.
    pub file_settings: DevboardToml,
}

impl Config {
    pub fn load(project_dir: PathBuf) -> Result<Self> {
        let devboard_dir = project_dir.join(DEVBOARD_DIR);
        let file_settings = DevboardToml::load_or_default(&devboard_dir)?;
        Ok(Self {
            config_path: devboard_dir.join(CONFIG_FILE),
            log_dir: devboard_dir.join("logs"),
            devboard_dir,
            project_dir,
            file_settings,
        })
    }

    /// File settings with the process environment overlaid.
    pub fn effective(&self) -> DevboardToml {
        self.file_settings.clone().with_process_env()
    }

    /// Working directory for spawned jobs.
    pub fn job_workdir(&self, settings: &DevboardToml) -> PathBuf {
        match &settings.jobs.workdir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.project_dir.join(dir),
            None => self.project_dir.clone(),
        }
    }
}
