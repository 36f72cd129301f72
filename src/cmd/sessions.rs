//! Session log inspection: `ntn sessions` and `ntn show`.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use ntn::conversation::{ContentBlock, Turn, TurnOrigin, TurnOutcome};
use ntn::log::paths::{list_sessions, resolve_session_arg};

pub fn cmd_sessions(project_dir: &Path) -> Result<()> {
    let sessions = list_sessions(project_dir)?;
    if sessions.is_empty() {
        println!("No sessions found. Start one with 'ntn run'.");
        return Ok(());
    }

    println!();
    println!("Sessions (newest first)");
    println!("=======================");
    println!();
    for path in sessions {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match ntn::log::load(&path) {
            Ok(log) => {
                let state = if log.cursor.is_idle() {
                    style("idle".to_string()).green()
                } else {
                    style(log.cursor.to_string()).yellow()
                };
                println!(
                    "  {}  model={}  turns={}  compactions={}  {}",
                    name,
                    log.header.model,
                    log.turns.len(),
                    log.compactions.len(),
                    state
                );
            }
            Err(e) => println!("  {}  {}", name, style(format!("unreadable: {e}")).red()),
        }
    }
    println!();
    Ok(())
}

fn outcome_label(turn: &Turn) -> String {
    match &turn.outcome {
        None => style("open").yellow().to_string(),
        Some(TurnOutcome::Completed) => style("completed").green().to_string(),
        Some(TurnOutcome::Interrupted) => style("interrupted").yellow().to_string(),
        Some(TurnOutcome::Failed { error }) => style(format!("failed: {error}")).red().to_string(),
    }
}

fn print_turn(turn: &Turn) {
    match turn.origin {
        TurnOrigin::Summary {
            first_turn,
            last_turn,
        } => {
            println!(
                "{} {}",
                style(format!("Turn {}", turn.index)).bold(),
                style(format!("(summary of turns {first_turn}-{last_turn})")).dim()
            );
            println!("  {}", turn.user_message.replace('\n', "\n  "));
            println!();
            return;
        }
        TurnOrigin::Genuine => {}
    }

    println!(
        "{} [{}]",
        style(format!("Turn {}", turn.index)).bold(),
        outcome_label(turn)
    );
    println!("  {} {}", style("user:").cyan(), turn.user_message);
    for round in &turn.rounds {
        for block in &round.response.content {
            match block {
                ContentBlock::Text { text } => {
                    println!("  {} {}", style("assistant:").blue(), text)
                }
                ContentBlock::ToolUse(call) => {
                    println!("  {} {} [{}]", style("tool:").yellow(), call.describe(), call.id)
                }
            }
        }
        for result in &round.results {
            let first_line = result.output.lines().next().unwrap_or("");
            println!(
                "  {} {} ({}) {}",
                style("result:").dim(),
                result.call_id,
                result.status,
                style(first_line).dim()
            );
        }
    }
    if let Some(final_message) = &turn.final_message {
        println!("  {} {}", style("assistant:").blue(), final_message.joined_text());
    }
    println!();
}

pub fn cmd_show(project_dir: &Path, target: &str) -> Result<()> {
    let path = resolve_session_arg(project_dir, target)?;
    let log = ntn::log::load(&path)
        .with_context(|| format!("Failed to load session log {}", path.display()))?;

    println!();
    println!("Session {}", style(&log.header.session_id).bold());
    println!("  log:      {}", log.path.display());
    println!("  created:  {}", log.header.created_at);
    println!("  model:    {}", log.header.model);
    println!("  cwd:      {}", log.header.cwd.display());
    println!("  state:    {}", log.cursor);
    if let Some(sandbox) = &log.sandbox
        && let Some(id) = &sandbox.container_id
    {
        println!("  sandbox:  {} ({} mounts)", id, sandbox.mounts.len());
    }
    if let Some(truncation) = &log.truncation {
        println!(
            "  {} untrusted tail from {}",
            style("warning:").yellow(),
            truncation
        );
    }
    for warning in &log.warnings {
        println!("  {} {}", style("warning:").yellow(), warning);
    }
    println!();

    for turn in &log.turns {
        print_turn(turn);
    }
    Ok(())
}
