//! Layered configuration for ntn.
//!
//! Settings are read from `.ntn/config.toml`, then overridden by environment
//! variables, then by CLI flags.
//!
//! ```toml
//! [model]
//! name = "claude-opus-4-5"
//! max_tokens = 4096
//! api_url = "https://api.anthropic.com"
//! timeout_secs = 600
//!
//! [context]
//! limit = "80%"
//! window_tokens = 200000
//! margin_percent = 10.0
//! summary_max_tokens = 2000
//! max_rounds_per_turn = 10
//!
//! [retry]
//! max_attempts = 4
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! retryable_statuses = [429, 500, 502, 503, 504, 529]
//!
//! [terminal]
//! timeout_secs = 120
//! max_output_bytes = 30000
//!
//! [sandbox]
//! image = "python:3.11-slim"
//! memory = "4g"
//! cpus = 2.0
//! ```
//!
//! | Variable             | Overrides          |
//! |----------------------|--------------------|
//! | `ANTHROPIC_API_KEY`  | (required, no file setting) |
//! | `NTN_MODEL`          | `model.name`       |
//! | `ANTHROPIC_BASE_URL` | `model.api_url`    |

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::compaction::{
    COMPACTION_SAFETY_MARGIN, CompactionConfig, DEFAULT_MODEL_WINDOW_TOKENS,
    DEFAULT_SUMMARY_MAX_TOKENS, parse_context_limit,
};
use crate::log::paths::{NTN_DIR, session_root};
use crate::provider::anthropic::DEFAULT_API_URL;
use crate::provider::retry::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS, DEFAULT_RETRYABLE_STATUSES,
};
use crate::provider::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL, RetryPolicy, default_system_prompt};
use crate::tools::{SandboxConfig, TerminalConfig};

pub const CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_MAX_ROUNDS_PER_TURN: usize = 10;

/// `[model]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSection {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
    /// Replaces the built-in system prompt when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_model_name() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    600
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            max_tokens: default_max_tokens(),
            api_url: default_api_url(),
            timeout_secs: default_request_timeout_secs(),
            system_prompt: None,
        }
    }
}

/// `[context]` section: compaction budget and per-turn limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSection {
    /// Percentage of the window (e.g. "80%") or an absolute token count.
    #[serde(default = "default_context_limit")]
    pub limit: String,
    #[serde(default = "default_window_tokens")]
    pub window_tokens: usize,
    #[serde(default = "default_margin_percent")]
    pub margin_percent: f32,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: usize,
    /// Model calls allowed within one turn before it is ended as failed.
    #[serde(default = "default_max_rounds_per_turn")]
    pub max_rounds_per_turn: usize,
}

fn default_context_limit() -> String {
    "80%".to_string()
}

fn default_window_tokens() -> usize {
    DEFAULT_MODEL_WINDOW_TOKENS
}

fn default_margin_percent() -> f32 {
    COMPACTION_SAFETY_MARGIN
}

fn default_summary_max_tokens() -> usize {
    DEFAULT_SUMMARY_MAX_TOKENS
}

fn default_max_rounds_per_turn() -> usize {
    DEFAULT_MAX_ROUNDS_PER_TURN
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            limit: default_context_limit(),
            window_tokens: default_window_tokens(),
            margin_percent: default_margin_percent(),
            summary_max_tokens: default_summary_max_tokens(),
            max_rounds_per_turn: default_max_rounds_per_turn(),
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_retryable_statuses() -> Vec<u16> {
    DEFAULT_RETRYABLE_STATUSES.to_vec()
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            retryable_statuses: default_retryable_statuses(),
        }
    }
}

/// The complete `.ntn/config.toml` structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NtnToml {
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

impl NtnToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config.toml")
    }

    /// Load `<ntn_dir>/config.toml`, or defaults if it doesn't exist.
    pub fn load_or_default(ntn_dir: &Path) -> Result<Self> {
        let config_path = ntn_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Model name (env → file).
    pub fn model_name(&self) -> String {
        std::env::var("NTN_MODEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.model.name.clone())
    }

    /// API base URL (env → file).
    pub fn api_url(&self) -> String {
        std::env::var("ANTHROPIC_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.model.api_url.clone())
    }

    /// Validate the configuration and return any problems found.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Err(e) = parse_context_limit(&self.context.limit) {
            warnings.push(format!(
                "Invalid context.limit '{}': {e}",
                self.context.limit
            ));
        }
        if self.context.window_tokens == 0 {
            warnings.push("context.window_tokens must be greater than zero".to_string());
        }
        if !(0.0..100.0).contains(&self.context.margin_percent) {
            warnings.push(format!(
                "context.margin_percent must be in [0, 100), got {}",
                self.context.margin_percent
            ));
        }
        if self.context.max_rounds_per_turn == 0 {
            warnings.push("context.max_rounds_per_turn must be at least 1".to_string());
        }
        if self.model.max_tokens == 0 {
            warnings.push("model.max_tokens must be greater than zero".to_string());
        }
        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            warnings.push(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            ));
        }
        warnings.extend(self.terminal.validate());
        warnings.extend(self.sandbox.validate());
        warnings
    }
}

/// Resolved configuration: the file plus environment and CLI overrides.
#[derive(Debug, Clone)]
pub struct NtnConfig {
    pub project_dir: PathBuf,
    pub ntn_dir: PathBuf,
    pub toml: NtnToml,
    pub verbose: bool,
    /// Approve every guarded tool call without asking.
    pub yes: bool,
    /// `--budget` override for `context.limit`.
    pub cli_budget: Option<String>,
}

impl NtnConfig {
    pub fn new(project_dir: impl AsRef<Path>) -> Result<Self> {
        let project_dir = project_dir
            .as_ref()
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let ntn_dir = project_dir.join(NTN_DIR);
        let toml = NtnToml::load_or_default(&ntn_dir)?;
        Ok(Self {
            project_dir,
            ntn_dir,
            toml,
            verbose: false,
            yes: false,
            cli_budget: None,
        })
    }

    pub fn with_cli_args(
        project_dir: impl AsRef<Path>,
        verbose: bool,
        yes: bool,
        budget: Option<String>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.yes = yes;
        config.cli_budget = budget;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.ntn_dir.join(CONFIG_FILE)
    }

    pub fn session_dir(&self) -> PathBuf {
        session_root(&self.project_dir)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.ntn_dir.join("logs")
    }

    pub fn model(&self) -> String {
        self.toml.model_name()
    }

    pub fn api_url(&self) -> String {
        self.toml.api_url()
    }

    pub fn api_key(&self) -> Result<String> {
        std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .context("ANTHROPIC_API_KEY is not set (export it or put it in .env)")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.model.timeout_secs)
    }

    pub fn max_tokens(&self) -> u32 {
        self.toml.model.max_tokens
    }

    pub fn max_rounds_per_turn(&self) -> usize {
        self.toml.context.max_rounds_per_turn
    }

    pub fn system_prompt(&self) -> String {
        self.toml
            .model
            .system_prompt
            .clone()
            .unwrap_or_else(|| default_system_prompt(&self.project_dir))
    }

    /// Compaction settings (CLI `--budget` → file).
    pub fn compaction_config(&self) -> Result<CompactionConfig> {
        let limit_str = self
            .cli_budget
            .as_deref()
            .unwrap_or(&self.toml.context.limit);
        Ok(CompactionConfig {
            limit: parse_context_limit(limit_str)?,
            window_tokens: self.toml.context.window_tokens,
            margin_percent: self.toml.context.margin_percent,
            summary_max_tokens: self.toml.context.summary_max_tokens,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let retry = &self.toml.retry;
        RetryPolicy {
            max_attempts: retry.max_attempts,
            base_delay_ms: retry.base_delay_ms,
            max_delay_ms: retry.max_delay_ms,
            retryable_statuses: retry.retryable_statuses.clone(),
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if let Some(budget) = &self.cli_budget
            && let Err(e) = parse_context_limit(budget)
        {
            warnings.push(format!("Invalid --budget '{budget}': {e}"));
        }
        warnings
    }
}
