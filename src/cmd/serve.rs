//! Dashboard server command: `devboard serve`.

use std::path::PathBuf;

use anyhow::Result;
use devboard::dashboard::server::{ServerConfig, start_server};

pub async fn cmd_serve(project_dir: PathBuf, port: u16, dev: bool, open: bool) -> Result<()> {
    start_server(ServerConfig {
        port,
        project_dir,
        dev_mode: dev,
        // No browser inside dev containers
        open_browser: open && !dev,
    })
    .await
}
