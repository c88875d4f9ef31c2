//! Configuration view and validation commands: `devboard config`.

use std::path::Path;

use anyhow::{Context, Result};
use devboard::config::{Config, DevboardToml};

use super::super::ConfigCommands;

fn ready(flag: bool) -> &'static str {
    if flag { "configured" } else { "not configured" }
}

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config = Config::load(project_dir.to_path_buf())?;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Devboard Configuration");
            println!("======================");
            println!();

            if config.config_path.exists() {
                println!("Config file: {}", config.config_path.display());
            } else {
                println!("No config.toml found at {}", config.config_path.display());
                println!("Using defaults. Run 'devboard config init' to create one.");
            }
            println!();

            // Environment overrides included, secrets masked
            let effective = config.effective();
            let rendered = toml::to_string_pretty(&effective.masked())
                .context("Failed to render configuration")?;
            println!("{}", rendered.trim_end());
            println!();
            println!("Jira:         {}", ready(effective.jira_ready()));
            println!("Azure DevOps: {}", ready(effective.azure_ready()));
            println!("Notes dir:    {}", effective.notes_dir().display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.effective().validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config.config_path.exists() {
                println!("config.toml already exists at {}", config.config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            DevboardToml::default().save(&config.config_path)?;

            println!("Created config.toml at {}", config.config_path.display());
            println!();
            println!("You can now set:");
            println!("  - [jira] host, email, api_token");
            println!("  - [azure_devops] organization, project, repository, pat");
            println!("  - [polling] interval_minutes");
            println!();
            println!("Secrets can also come from the environment or a .env file.");
            println!();
        }
    }

    Ok(())
}
