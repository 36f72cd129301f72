//! [`Console`] for an interactive terminal.
//!
//! Input and confirmations go through `dialoguer` on a blocking thread so the
//! runtime keeps servicing the Ctrl-C handler. A spinner runs while the model
//! is working.

use std::io::ErrorKind;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use console::style;
use dialoguer::{Confirm, Input};
use indicatif::{ProgressBar, ProgressStyle};

use super::icons::{CHECK, COMPACT, CROSS, REFUSED, RESUME, STOP, TOOL, WARN};
use crate::conversation::ToolStatus;
use crate::session::{Console, SessionEvent};

/// Result lines shown per tool call unless verbose.
const PREVIEW_LINES: usize = 8;

pub struct TerminalConsole {
    verbose: bool,
    spinner: Mutex<Option<ProgressBar>>,
}

impl TerminalConsole {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            spinner: Mutex::new(None),
        }
    }

    fn stop_spinner(&self) {
        let mut spinner = self.spinner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = spinner.take() {
            bar.finish_and_clear();
        }
    }

    fn preview(&self, output: &str) -> String {
        if self.verbose {
            return output.to_string();
        }
        let lines: Vec<&str> = output.lines().collect();
        if lines.len() <= PREVIEW_LINES {
            return output.to_string();
        }
        format!(
            "{}\n{}",
            lines[..PREVIEW_LINES].join("\n"),
            style(format!("... {} more lines", lines.len() - PREVIEW_LINES)).dim()
        )
    }
}

fn is_end_of_input(error: &dialoguer::Error) -> bool {
    #[allow(unreachable_patterns)]
    match error {
        dialoguer::Error::IO(e) => {
            matches!(e.kind(), ErrorKind::UnexpectedEof | ErrorKind::Interrupted)
        }
        _ => false,
    }
}

#[async_trait]
impl Console for TerminalConsole {
    async fn read_input(&self) -> Result<Option<String>> {
        self.stop_spinner();
        println!();
        let answer = tokio::task::spawn_blocking(|| {
            Input::<String>::new()
                .with_prompt(format!("{}", style("You").green().bold()))
                .allow_empty(true)
                .interact_text()
        })
        .await
        .context("Input task failed")?;

        match answer {
            Ok(text) => Ok(Some(text)),
            Err(e) if is_end_of_input(&e) => Ok(None),
            Err(e) => Err(e).context("Failed to read user input"),
        }
    }

    async fn confirm(&self, prompt: &str) -> Result<bool> {
        self.stop_spinner();
        let prompt = prompt.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            Confirm::new().with_prompt(prompt).default(false).interact()
        })
        .await
        .context("Confirmation task failed")?;
        answer.context("Failed to read confirmation")
    }

    fn show(&self, event: SessionEvent) {
        self.stop_spinner();
        match event {
            SessionEvent::Resumed {
                log_path,
                turns,
                cursor,
            } => println!(
                "{}Resumed {} ({turns} turns, {cursor})",
                RESUME,
                style(log_path.display()).cyan()
            ),
            SessionEvent::AssistantText(text) => {
                println!("\n{}\n{text}", style("Assistant").blue().bold())
            }
            SessionEvent::ToolCall {
                call_id,
                description,
            } => println!(
                "{}{} {}",
                TOOL,
                style(description).yellow(),
                style(format!("[{call_id}]")).dim()
            ),
            SessionEvent::ToolResult { status, output, .. } => {
                let icon = match status {
                    ToolStatus::Ok => &CHECK,
                    ToolStatus::Error => &CROSS,
                    ToolStatus::Refused => &REFUSED,
                };
                println!("{}{}", icon, style(self.preview(&output)).dim());
            }
            SessionEvent::Compacted {
                first_turn,
                last_turn,
                estimated_before,
                estimated_after,
            } => println!(
                "{}Compacted turns {first_turn}-{last_turn} (~{estimated_before} → ~{estimated_after} tokens)",
                COMPACT
            ),
            SessionEvent::TurnInterrupted => {
                println!("{}{}", STOP, style("Interrupted").yellow())
            }
            SessionEvent::TurnFailed(error) => {
                println!("{}{}", CROSS, style(format!("Turn failed: {error}")).red())
            }
            SessionEvent::Warning(message) => println!("{}{}", WARN, style(message).yellow()),
        }
    }

    fn waiting(&self, message: Option<&str>) {
        self.stop_spinner();
        let Some(message) = message else {
            return;
        };
        let bar = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
            bar.set_style(spinner_style);
        }
        bar.set_message(style(message).dim().to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        *self.spinner.lock().unwrap_or_else(|e| e.into_inner()) = Some(bar);
    }
}
