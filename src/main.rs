use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stepchain::config::Config;
use stepchain::init::is_initialized;
use stepchain::logging::init_logging;

mod cmd;

#[derive(Parser)]
#[command(name = "stepchain")]
#[command(
    version,
    about = "Durable multi-step job chains that survive restarts"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Chain state file. Overrides stepchain.toml and STEPCHAIN_STATE_FILE.
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new stepchain project
    Init,
    /// Submit a chain definition (JSON or TOML) and wait for it to finish
    Submit {
        /// Path to the chain definition
        file: PathBuf,

        /// Override the chain name from the file
        #[arg(short, long)]
        name: Option<String>,

        /// UI output mode: full, minimal, json
        #[arg(long, default_value = "full")]
        ui: String,
    },
    /// Resume chains interrupted by a previous run
    Resume {
        /// UI output mode: full, minimal, json
        #[arg(long, default_value = "full")]
        ui: String,
    },
    /// List recorded chains
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one chain's progress
    Status {
        chain_id: String,

        #[arg(long)]
        json: bool,
    },
    /// Remove expired completed chains
    Cleanup {
        /// Also remove incomplete chains older than the retention window
        #[arg(long)]
        abandoned: bool,
    },
    /// Remove every recorded chain
    Clear {
        #[arg(long)]
        force: bool,
    },
    /// List available worker kinds
    Workers,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default stepchain.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let config = Config::new(project_dir, cli.verbose, cli.state_file.clone())?;

    // Only write log files into projects that have been initialized.
    let log_dir = is_initialized(&config.project_dir).then_some(config.log_dir.as_path());
    let _log_guard = init_logging(config.logging(), log_dir, cli.verbose)?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&config.project_dir)?,
        Commands::Submit { file, name, ui } => {
            cmd::cmd_submit(&config, file, name.as_deref(), ui).await?
        }
        Commands::Resume { ui } => cmd::cmd_resume(&config, ui).await?,
        Commands::List { json } => cmd::cmd_list(&config, *json).await?,
        Commands::Status { chain_id, json } => cmd::cmd_status(&config, chain_id, *json).await?,
        Commands::Cleanup { abandoned } => cmd::cmd_cleanup(&config, *abandoned).await?,
        Commands::Clear { force } => cmd::cmd_clear(&config, *force).await?,
        Commands::Workers => cmd::cmd_workers(&config)?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
