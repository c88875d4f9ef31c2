use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use devboard::config::{DEVBOARD_DIR, Config};
use devboard::logging::{self, LogOptions};

mod cmd;

#[derive(Parser)]
#[command(name = "devboard")]
#[command(
    version,
    about = "Developer dashboard linking Jira tickets to Azure DevOps pull requests"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the dashboard server
    Serve {
        /// Port to serve on (defaults to server.port in config.toml)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (permissive CORS, listen on all interfaces)
        #[arg(long)]
        dev: bool,

        /// Open the dashboard in a browser once the server is up
        #[arg(long)]
        open: bool,
    },
    /// Show, initialize or validate the configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration with secrets masked
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default config.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_dir = match &cli.command {
        Commands::Serve { .. } => Some(project_dir.join(DEVBOARD_DIR).join("logs")),
        Commands::Config { .. } => None,
    };
    let _guard = logging::init(&LogOptions {
        verbose: cli.verbose,
        json: cli.log_json,
        log_dir,
    })?;

    match &cli.command {
        Commands::Serve { port, dev, open } => {
            let config = Config::load(project_dir.clone())?;
            let port = port.unwrap_or(config.file_settings.server.port);
            cmd::cmd_serve(project_dir, port, *dev, *open).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
