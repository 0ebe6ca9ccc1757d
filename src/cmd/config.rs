//! Configuration view and validation commands: `stepchain config`.

use anyhow::{Context, Result};
use stepchain::config::Config;
use stepchain::init::write_default_config;

use super::super::ConfigCommands;

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Stepchain Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No stepchain.toml found at {}", config_path.display());
                println!("Using defaults. Run 'stepchain config init' to create one.");
            }
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!();
            let rendered = toml::to_string_pretty(&config.toml)
                .context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();
            println!("State file: {}", config.state_file.display());
            println!("Log dir:    {}", config.log_dir.display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
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
            std::fs::create_dir_all(&config.stepchain_dir)
                .context("Failed to create .stepchain directory")?;
            if write_default_config(&config.stepchain_dir, false)? {
                println!("Created stepchain.toml at {}", config_path.display());
            } else {
                println!(
                    "stepchain.toml already exists at {}",
                    config_path.display()
                );
                println!("Delete it first if you want to recreate it.");
            }
        }
    }

    Ok(())
}
