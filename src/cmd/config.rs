//! Configuration view and validation commands: `shopfloor config`.

use anyhow::Result;
use console::style;

use super::super::ConfigCommands;
use shopfloor::config::{ShopfloorConfig, ShopfloorToml};

pub fn cmd_config(config: &ShopfloorConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_path();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("{}", style("Shopfloor Configuration").bold());
            println!("=======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No shopfloor.toml found at {}", config_path.display());
                println!("Using defaults. Run 'shopfloor config init' to create one.");
            }
            println!();
            println!("Effective values (with env/CLI overrides):");
            println!();
            print!("{}", toml::to_string_pretty(&config.toml)?);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No shopfloor.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = ShopfloorToml::load(&config_path)?;
            let warnings: Vec<String> = toml
                .validate()
                .into_iter()
                .chain(config.env_warnings.iter().cloned())
                .collect();

            if warnings.is_empty() {
                println!("{}", style("Configuration is valid.").green());
            } else {
                println!("{}", style("Configuration warnings:").yellow());
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("shopfloor.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config.config_dir)?;
            ShopfloorToml::default().save(&config_path)?;

            println!("Created shopfloor.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, db_path, dev_mode");
            println!("  - [client] base_url, request_timeout_secs");
            println!("  - [live] reconnect_delay_ms, max_reconnect_attempts, poll_interval_ms");
            println!();
        }
    }

    Ok(())
}
