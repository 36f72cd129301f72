//! Configuration view and validation commands: `ntn config`.

use std::path::Path;

use anyhow::Result;

use ntn::config::{CONFIG_FILE, NtnConfig, NtnToml};
use ntn::log::paths::NTN_DIR;

use super::super::ConfigCommands;

fn print_toml(toml: &NtnToml) {
    println!("[model]");
    println!("  name = \"{}\"", toml.model.name);
    println!("  max_tokens = {}", toml.model.max_tokens);
    println!("  api_url = \"{}\"", toml.model.api_url);
    println!("  timeout_secs = {}", toml.model.timeout_secs);
    if toml.model.system_prompt.is_some() {
        println!("  system_prompt = (custom)");
    }
    println!();

    println!("[context]");
    println!("  limit = \"{}\"", toml.context.limit);
    println!("  window_tokens = {}", toml.context.window_tokens);
    println!("  margin_percent = {}", toml.context.margin_percent);
    println!("  summary_max_tokens = {}", toml.context.summary_max_tokens);
    println!("  max_rounds_per_turn = {}", toml.context.max_rounds_per_turn);
    println!();

    println!("[retry]");
    println!("  max_attempts = {}", toml.retry.max_attempts);
    println!("  base_delay_ms = {}", toml.retry.base_delay_ms);
    println!("  max_delay_ms = {}", toml.retry.max_delay_ms);
    println!("  retryable_statuses = {:?}", toml.retry.retryable_statuses);
    println!();

    println!("[terminal]");
    println!(
        "  allowed_commands = {} entries",
        toml.terminal.allowed_commands.len()
    );
    println!(
        "  confirm_patterns = {} entries",
        toml.terminal.confirm_patterns.len()
    );
    println!("  timeout_secs = {}", toml.terminal.timeout_secs);
    println!("  max_output_bytes = {}", toml.terminal.max_output_bytes);
    println!();

    println!("[sandbox]");
    println!("  image = \"{}\"", toml.sandbox.image);
    println!("  workdir = \"{}\"", toml.sandbox.workdir);
    println!("  memory = \"{}\"", toml.sandbox.memory);
    println!("  cpus = {}", toml.sandbox.cpus);
    println!();
}

pub fn cmd_config(
    project_dir: &Path,
    budget: Option<String>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let ntn_dir = project_dir.join(NTN_DIR);
    let config_path = ntn_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("ntn Configuration");
            println!("=================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No config.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let config = NtnConfig::with_cli_args(project_dir, false, false, budget)?;
            print_toml(&config.toml);

            println!("Effective values (with env and CLI overrides):");
            println!("  model = \"{}\"", config.model());
            println!("  api_url = \"{}\"", config.api_url());
            println!(
                "  api_key = {}",
                if config.api_key().is_ok() {
                    "set"
                } else {
                    "NOT SET"
                }
            );
            let compaction = config.compaction_config()?;
            println!(
                "  context budget = {} tokens (compacts down to {})",
                compaction.budget(),
                compaction.target()
            );
            println!();

            if !config_path.exists() {
                println!("Run 'ntn config init' to create a config.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No config.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = NtnToml::load(&config_path)?;
            let warnings = toml.validate();

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
            if config_path.exists() {
                println!("config.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            NtnToml::default().save(&config_path)?;

            println!("Created config.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [model] name, max_tokens, system_prompt");
            println!("  - [context] limit, summary_max_tokens, max_rounds_per_turn");
            println!("  - [terminal] allowed_commands, confirm_patterns");
            println!("  - [sandbox] image, memory, cpus");
            println!();
        }
    }

    Ok(())
}
