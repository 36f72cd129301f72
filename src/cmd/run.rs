//! Interactive agent session: `ntn run` and `ntn run --resume`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;

use super::super::Cli;

pub async fn cmd_run(cli: &Cli, project_dir: PathBuf, resume: Option<String>) -> Result<()> {
    use ntn::compaction::{Compactor, TokenEstimator};
    use ntn::config::NtnConfig;
    use ntn::log::SessionHeader;
    use ntn::log::paths::{resolve_session_arg, session_file_name, session_root};
    use ntn::provider::AnthropicProvider;
    use ntn::session::{Interrupt, Session, SessionOptions, SessionParts};
    use ntn::tools::{
        DockerSandbox, SandboxTool, TerminalTool, Toolbox, WebTools, builtin_definitions,
    };
    use ntn::ui::TerminalConsole;

    let config = NtnConfig::with_cli_args(&project_dir, cli.verbose, cli.yes, cli.budget.clone())?;
    let warnings = config.validate();
    if !warnings.is_empty() {
        anyhow::bail!(
            "Invalid configuration:\n  - {}\nRun 'ntn config validate' for details.",
            warnings.join("\n  - ")
        );
    }

    // Load the log before building anything so a bad --resume fails fast.
    let resumed = match resume.as_deref() {
        Some(target) => {
            let path = resolve_session_arg(&config.project_dir, target)?;
            let log = ntn::log::load(&path)
                .with_context(|| format!("Failed to load session log {}", path.display()))?;
            Some(log)
        }
        None => None,
    };
    let session_id = match &resumed {
        Some(log) => log.header.session_id.clone(),
        None => uuid::Uuid::new_v4().to_string(),
    };

    let system_prompt = config.system_prompt();
    let provider = AnthropicProvider::new(
        config.api_key()?,
        config.api_url(),
        config.model(),
        config.request_timeout(),
        config.retry_policy(),
    )?;

    let manager = Arc::new(DockerSandbox::new(config.toml.sandbox.clone(), &session_id));
    let toolbox = Toolbox::new(
        TerminalTool::new(&config.project_dir, &config.toml.terminal)?,
        WebTools::new()?,
        SandboxTool::new(
            manager,
            &config.project_dir,
            config.toml.sandbox.workdir.clone(),
        ),
    );

    let estimator = TokenEstimator::for_request(&system_prompt, &builtin_definitions());
    let compactor = Compactor::new(config.compaction_config()?, estimator);

    let interrupt = Interrupt::new();
    let handler = interrupt.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Ctrl-C received");
            handler.trigger();
        }
    });

    let parts = SessionParts {
        provider: Arc::new(provider),
        tools: Arc::new(toolbox),
        console: Arc::new(TerminalConsole::new(config.verbose)),
        compactor,
        interrupt,
        options: SessionOptions {
            system_prompt,
            max_tokens: config.max_tokens(),
            max_rounds_per_turn: config.max_rounds_per_turn(),
            retry: config.retry_policy(),
            auto_approve: config.yes,
        },
    };

    println!();
    println!(
        "{} {} {}",
        style("ntn").bold(),
        style(config.model()).cyan(),
        style("(type 'exit' or press Ctrl-D to quit, Ctrl-C interrupts a turn)").dim()
    );

    let session = match resumed {
        Some(log) => Session::resume(log, parts)?,
        None => {
            let header = SessionHeader::v1(&session_id, &config.project_dir, config.model());
            let path = session_root(&config.project_dir)
                .join(session_file_name(&header.created_at, &session_id));
            Session::start(&path, header, parts)?
        }
    };

    match session.run().await? {
        Some(path) => {
            println!();
            println!("Session log: {}", path.display());
            println!(
                "Resume with: ntn run --resume {}",
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            );
        }
        None => {
            println!();
            println!("Nothing recorded; session log removed.");
        }
    }
    Ok(())
}
