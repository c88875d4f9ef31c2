use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use futures::FutureExt;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use super::api::{self, AppState, SharedState};
use super::service::{DashboardService, RefreshOutcome};
use crate::config::Config;
use crate::jobs::{JobLauncher, JobTracker};
use crate::polling::{PollingRefresher, RefreshFn};

/// Configuration for the dashboard server.
pub struct ServerConfig {
    pub port: u16,
    pub project_dir: PathBuf,
    pub dev_mode: bool,
    pub open_browser: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4200,
            project_dir: PathBuf::from("."),
            dev_mode: false,
            open_browser: false,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: SharedState) -> Router {
    api::api_router().with_state(state)
}

/// Wire the service to a job tracker and a poller that refreshes it.
pub fn build_state(service: Arc<DashboardService>) -> SharedState {
    let refresh: RefreshFn = {
        let service = service.clone();
        Arc::new(move || {
            let service = service.clone();
            async move {
                match service.refresh().await {
                    Ok(RefreshOutcome::Refreshed { tickets, prs }) => {
                        info!(tickets, prs, "scheduled refresh complete");
                    }
                    Ok(RefreshOutcome::Skipped { reason }) => {
                        info!("scheduled refresh skipped: {}", reason);
                    }
                    Err(e) => warn!("scheduled refresh failed: {}", e),
                }
            }
            .boxed()
        })
    };

    let jobs = Arc::new(JobTracker::new());
    Arc::new(AppState {
        service,
        launcher: JobLauncher::new(jobs.clone()),
        jobs,
        poller: PollingRefresher::new(refresh),
    })
}

/// Start the dashboard server and block until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let settings = Config::load(config.project_dir.clone()).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            config.project_dir.display()
        )
    })?;
    let service = Arc::new(DashboardService::new(settings));
    if !service.jira_configured() {
        warn!("Jira is not configured; ticket views will be empty");
    }
    if !service.azure_configured() {
        warn!("Azure DevOps is not configured; pull request views will be empty");
    }

    let state = build_state(service);
    state.poller.start(state.service.poll_interval_minutes());

    let mut app = build_router(state.clone());

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    let url = format!("http://localhost:{}", local_addr.port());
    info!(addr = %local_addr, "devboard running at {}", url);

    if config.open_browser
        && let Err(e) = open::that(&url)
    {
        warn!("failed to open browser: {}", e);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.poller.stop();
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
