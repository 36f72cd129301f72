use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "ntn")]
#[command(version, about = "Interactive coding agent with a crash-resilient session log")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run guarded tool calls without asking for confirmation
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Context budget for compaction (e.g., "80%" or "150000" tokens). Overrides config.toml.
    #[arg(long, global = true)]
    pub budget: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive session
    Run {
        /// Resume a session: a log path, a log file name, or `latest` (the default)
        #[arg(long, num_args = 0..=1, default_missing_value = "latest")]
        resume: Option<String>,
    },
    /// List recorded sessions, newest first
    Sessions,
    /// Print the conversation recorded in a session log
    Show {
        /// A log path, a log file name, or `latest`
        #[arg(default_value = "latest")]
        target: String,
    },
    /// View and validate configuration
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

    match &cli.command {
        Commands::Run { resume } => {
            let log_dir = project_dir.join(ntn::log::paths::NTN_DIR).join("logs");
            let _guard = ntn::logging::init(&log_dir, cli.verbose)?;
            cmd::cmd_run(&cli, project_dir, resume.clone()).await?;
        }
        Commands::Sessions => cmd::cmd_sessions(&project_dir)?,
        Commands::Show { target } => cmd::cmd_show(&project_dir, target)?,
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, cli.budget.clone(), command.clone())?
        }
    }

    Ok(())
}
