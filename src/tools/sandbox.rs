//! `docker_sandbox`: a persistent container with explicit bind mounts.
//!
//! The container is named after the session, so its identifier survives
//! remounts and process restarts. The session persists the identifier and
//! mount list as `SANDBOX` blocks; on resume the first sandbox action
//! reattaches through [`SandboxManager::ensure_container`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as DockerError;
use bollard::exec::{StartExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, ExecConfig, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, InspectContainerOptions, RemoveContainerOptionsBuilder,
    StartContainerOptions,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::conversation::ToolResult;
use crate::conversation::tool_call::{MountMode, SandboxAction};
use crate::log::{SandboxMount, SandboxState};

/// `[sandbox]` section of `.ntn/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub image: String,
    /// Mount root and working directory inside the container.
    pub workdir: String,
    pub memory: String,
    pub cpus: f64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "python:3.11-slim".to_string(),
            workdir: "/workspace".to_string(),
            memory: "4g".to_string(),
            cpus: 2.0,
        }
    }
}

impl SandboxConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.image.trim().is_empty() {
            problems.push("sandbox.image must not be empty".to_string());
        }
        if !self.workdir.starts_with('/') {
            problems.push(format!(
                "sandbox.workdir must be an absolute container path, got '{}'",
                self.workdir
            ));
        }
        if let Err(e) = parse_memory(&self.memory) {
            problems.push(format!("sandbox.memory: {e}"));
        }
        if self.cpus <= 0.0 {
            problems.push(format!("sandbox.cpus must be positive, got {}", self.cpus));
        }
        problems
    }
}

/// Parse a Docker-style memory size such as `512m` or `4g` into bytes.
pub fn parse_memory(value: &str) -> Result<i64> {
    let value = value.trim().to_ascii_lowercase();
    let (digits, multiplier) = match value.chars().last() {
        Some('k') => (&value[..value.len() - 1], 1024),
        Some('m') => (&value[..value.len() - 1], 1024 * 1024),
        Some('g') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        Some('b') => (&value[..value.len() - 1], 1),
        _ => (value.as_str(), 1),
    };
    let amount: i64 = digits
        .parse()
        .with_context(|| format!("Invalid memory size '{value}'"))?;
    Ok(amount * multiplier)
}

/// Output of a command run inside the container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecOutput {
    pub output: String,
    pub exit_code: i64,
}

/// Container lifecycle operations the sandbox tool needs.
#[async_trait]
pub trait SandboxManager: Send + Sync {
    /// Reattach to `existing` if it is still usable, otherwise start a
    /// container with `mounts` and return its identifier.
    async fn ensure_container(&self, existing: Option<&str>, mounts: &[SandboxMount])
    -> Result<String>;

    /// Replace the container's bind list. Returns the identifier to use afterwards.
    async fn remount(&self, id: &str, mounts: &[SandboxMount]) -> Result<String>;

    async fn exec(&self, id: &str, command: &str) -> Result<ExecOutput>;
}

/// [`SandboxManager`] backed by the local Docker daemon.
pub struct DockerSandbox {
    config: SandboxConfig,
    name: String,
}

impl DockerSandbox {
    pub fn new(config: SandboxConfig, session_id: &str) -> Self {
        Self {
            config,
            name: format!("ntn-{session_id}"),
        }
    }

    pub fn container_name(&self) -> &str {
        &self.name
    }

    fn client(&self) -> Result<Docker> {
        Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")
    }

    fn binds(mounts: &[SandboxMount]) -> Vec<String> {
        mounts
            .iter()
            .map(|m| format!("{}:{}:{}", m.host_path.display(), m.container_path, m.mode))
            .collect()
    }

    async fn create(&self, docker: &Docker, mounts: &[SandboxMount]) -> Result<String> {
        self.remove(docker, &self.name).await?;

        let host_config = HostConfig {
            binds: Some(Self::binds(mounts)),
            memory: Some(parse_memory(&self.config.memory)?),
            nano_cpus: Some((self.config.cpus * 1_000_000_000.0) as i64),
            ..Default::default()
        };
        let body = ContainerCreateBody {
            image: Some(self.config.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            working_dir: Some(self.config.workdir.clone()),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptionsBuilder::default()
            .name(&self.name)
            .build();

        docker
            .create_container(Some(options), body)
            .await
            .with_context(|| format!("Failed to create container from image {}", self.config.image))?;
        docker
            .start_container(&self.name, None::<StartContainerOptions>)
            .await
            .with_context(|| format!("Failed to start container {}", self.name))?;

        info!(container = %self.name, mounts = mounts.len(), "Sandbox container started");
        Ok(self.name.clone())
    }

    async fn remove(&self, docker: &Docker, id: &str) -> Result<()> {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        match docker.remove_container(id, Some(options)).await {
            Ok(()) => {
                debug!(container = id, "Removed container");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove container {id}")),
        }
    }
}

fn is_not_found(error: &DockerError) -> bool {
    matches!(
        error,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl SandboxManager for DockerSandbox {
    async fn ensure_container(
        &self,
        existing: Option<&str>,
        mounts: &[SandboxMount],
    ) -> Result<String> {
        let docker = self.client()?;
        if let Some(id) = existing {
            match docker
                .inspect_container(id, None::<InspectContainerOptions>)
                .await
            {
                Ok(info) => {
                    let running = info.state.and_then(|s| s.running).unwrap_or(false);
                    if !running {
                        docker
                            .start_container(id, None::<StartContainerOptions>)
                            .await
                            .with_context(|| format!("Failed to restart container {id}"))?;
                    }
                    info!(container = id, "Reattached to sandbox container");
                    return Ok(id.to_string());
                }
                Err(e) if is_not_found(&e) => {
                    warn!(container = id, "Persisted sandbox container is gone, recreating");
                }
                Err(e) => return Err(e).with_context(|| format!("Failed to inspect container {id}")),
            }
        }
        self.create(&docker, mounts).await
    }

    async fn remount(&self, id: &str, mounts: &[SandboxMount]) -> Result<String> {
        let docker = self.client()?;
        self.remove(&docker, id).await?;
        self.create(&docker, mounts).await
    }

    async fn exec(&self, id: &str, command: &str) -> Result<ExecOutput> {
        let docker = self.client()?;
        let config = ExecConfig {
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(self.config.workdir.clone()),
            ..Default::default()
        };
        let exec = docker
            .create_exec(id, config)
            .await
            .with_context(|| format!("Failed to create exec in container {id}"))?;

        let mut output = String::new();
        if let StartExecResults::Attached { output: mut stream, .. } = docker
            .start_exec(&exec.id, None::<StartExecOptions>)
            .await
            .context("Failed to start exec")?
        {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.context("Failed to read exec output")?;
                output.push_str(&chunk.to_string());
            }
        }

        let inspected = docker
            .inspect_exec(&exec.id)
            .await
            .context("Failed to inspect exec")?;
        Ok(ExecOutput {
            output,
            exit_code: inspected.exit_code.unwrap_or(-1),
        })
    }
}

/// The `docker_sandbox` tool: translates actions into manager calls and
/// tracks the state the session persists.
pub struct SandboxTool {
    manager: Arc<dyn SandboxManager>,
    workspace: PathBuf,
    container_root: String,
    state: Mutex<SandboxState>,
    attached: Mutex<bool>,
    // Serializes container operations within a round.
    ops: tokio::sync::Mutex<()>,
}

impl SandboxTool {
    pub fn new(
        manager: Arc<dyn SandboxManager>,
        workspace: impl AsRef<Path>,
        container_root: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            workspace: workspace.as_ref().to_path_buf(),
            container_root: container_root.into().trim_end_matches('/').to_string(),
            state: Mutex::new(SandboxState::default()),
            attached: Mutex::new(false),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SandboxState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_attached(&self) -> bool {
        *self.attached.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_attached(&self, value: bool) {
        *self.attached.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }

    pub fn state(&self) -> SandboxState {
        self.lock_state().clone()
    }

    /// Adopt state recovered from the log; the container is reattached on next use.
    pub fn restore(&self, state: SandboxState) {
        *self.lock_state() = state;
        self.set_attached(false);
    }

    pub async fn handle(&self, call_id: &str, action: &SandboxAction) -> ToolResult {
        let _guard = self.ops.lock().await;
        let outcome = match action {
            SandboxAction::Start => self.start().await,
            SandboxAction::Mount { host_path, mode } => self.mount(host_path, *mode).await,
            SandboxAction::Exec { command } => self.exec(command).await,
            SandboxAction::Status => Ok(self.status()),
        };
        match outcome {
            Ok(Ok(text)) => ToolResult::ok(call_id, text),
            Ok(Err(text)) => ToolResult::error(call_id, text),
            Err(e) => ToolResult::error(call_id, format!("Sandbox error: {e:#}")),
        }
    }

    async fn attach(&self) -> Result<String> {
        let current = self.state();
        if let (true, Some(id)) = (self.is_attached(), current.container_id.clone()) {
            return Ok(id);
        }
        let id = self
            .manager
            .ensure_container(current.container_id.as_deref(), &current.mounts)
            .await?;
        self.lock_state().container_id = Some(id.clone());
        self.set_attached(true);
        Ok(id)
    }

    async fn start(&self) -> Result<Result<String, String>> {
        let id = self.attach().await?;
        Ok(Ok(format!("Sandbox container {id} is running")))
    }

    async fn mount(&self, host_path: &str, mode: MountMode) -> Result<Result<String, String>> {
        let requested = self.workspace.join(host_path);
        let host = match requested.canonicalize() {
            Ok(path) => path,
            Err(e) => {
                return Ok(Err(format!(
                    "Cannot mount {}: {e}",
                    requested.display()
                )));
            }
        };

        let mut mounts = self.state().mounts;
        let container_path = match mounts.iter_mut().find(|m| m.host_path == host) {
            Some(existing) => {
                existing.mode = mode;
                existing.container_path.clone()
            }
            None => {
                let path = self.container_path_for(&host, &mounts);
                mounts.push(SandboxMount {
                    host_path: host.clone(),
                    container_path: path.clone(),
                    mode,
                });
                path
            }
        };

        let current = self.state().container_id;
        let id = match current {
            Some(id) => self.manager.remount(&id, &mounts).await?,
            None => self.manager.ensure_container(None, &mounts).await?,
        };
        {
            let mut state = self.lock_state();
            state.container_id = Some(id);
            state.mounts = mounts;
        }
        self.set_attached(true);
        Ok(Ok(format!(
            "Mounted {} at {container_path} ({mode})",
            host.display()
        )))
    }

    fn container_path_for(&self, host: &Path, mounts: &[SandboxMount]) -> String {
        let base = host
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        let taken = |candidate: &str| mounts.iter().any(|m| m.container_path == candidate);
        let mut candidate = format!("{}/{base}", self.container_root);
        let mut suffix = 2;
        while taken(&candidate) {
            candidate = format!("{}/{base}-{suffix}", self.container_root);
            suffix += 1;
        }
        candidate
    }

    async fn exec(&self, command: &str) -> Result<Result<String, String>> {
        let id = self.attach().await?;
        let result = self.manager.exec(&id, command).await?;
        let text = serde_json::to_string(&result)?;
        Ok(if result.exit_code == 0 { Ok(text) } else { Err(text) })
    }

    fn status(&self) -> Result<String, String> {
        let state = self.state();
        serde_json::to_string(&state).map_err(|e| format!("Failed to encode sandbox state: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ToolStatus;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeManager {
        calls: Mutex<Vec<String>>,
        exit_code: i64,
    }

    impl FakeManager {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SandboxManager for FakeManager {
        async fn ensure_container(
            &self,
            existing: Option<&str>,
            mounts: &[SandboxMount],
        ) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("ensure({existing:?}, {})", mounts.len()));
            Ok(existing.unwrap_or("ntn-test").to_string())
        }

        async fn remount(&self, id: &str, mounts: &[SandboxMount]) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("remount({id}, {})", mounts.len()));
            Ok(id.to_string())
        }

        async fn exec(&self, id: &str, command: &str) -> Result<ExecOutput> {
            self.calls.lock().unwrap().push(format!("exec({id}, {command})"));
            Ok(ExecOutput {
                output: "out\n".into(),
                exit_code: self.exit_code,
            })
        }
    }

    fn tool(manager: Arc<FakeManager>, workspace: &Path) -> SandboxTool {
        SandboxTool::new(manager, workspace, "/workspace/")
    }

    #[tokio::test]
    async fn test_start_records_container_id() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(FakeManager::default());
        let sandbox = tool(manager.clone(), dir.path());

        let result = sandbox.handle("c1", &SandboxAction::Start).await;
        assert_eq!(result.status, ToolStatus::Ok);
        assert_eq!(sandbox.state().container_id.as_deref(), Some("ntn-test"));

        sandbox.handle("c2", &SandboxAction::Start).await;
        assert_eq!(manager.calls(), vec!["ensure(None, 0)"]);
    }

    #[tokio::test]
    async fn test_mount_assigns_unique_container_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a/data")).unwrap();
        std::fs::create_dir_all(dir.path().join("b/data")).unwrap();
        let manager = Arc::new(FakeManager::default());
        let sandbox = tool(manager.clone(), dir.path());

        let mount = |path: &str, mode| SandboxAction::Mount {
            host_path: path.to_string(),
            mode,
        };
        let first = sandbox.handle("c1", &mount("a/data", MountMode::ReadOnly)).await;
        assert_eq!(first.status, ToolStatus::Ok);
        assert!(first.output.contains("/workspace/data (ro)"));
        sandbox.handle("c2", &mount("b/data", MountMode::ReadWrite)).await;

        let state = sandbox.state();
        let paths: Vec<_> = state.mounts.iter().map(|m| m.container_path.as_str()).collect();
        assert_eq!(paths, vec!["/workspace/data", "/workspace/data-2"]);
        assert_eq!(manager.calls(), vec!["ensure(None, 1)", "remount(ntn-test, 2)"]);

        // Remounting the same host path only changes its mode.
        sandbox.handle("c3", &mount("a/data", MountMode::ReadWrite)).await;
        let state = sandbox.state();
        assert_eq!(state.mounts.len(), 2);
        assert_eq!(state.mounts[0].mode, MountMode::ReadWrite);
    }

    #[tokio::test]
    async fn test_mount_missing_path_is_error() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(FakeManager::default());
        let sandbox = tool(manager.clone(), dir.path());
        let result = sandbox
            .handle(
                "c1",
                &SandboxAction::Mount {
                    host_path: "nope".into(),
                    mode: MountMode::ReadWrite,
                },
            )
            .await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(manager.calls().is_empty());
        assert_eq!(sandbox.state(), SandboxState::default());
    }

    #[tokio::test]
    async fn test_restored_state_reattaches_on_first_use() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(FakeManager::default());
        let sandbox = tool(manager.clone(), dir.path());
        sandbox.restore(SandboxState {
            container_id: Some("ntn-old".into()),
            mounts: vec![],
        });

        let result = sandbox
            .handle(
                "c1",
                &SandboxAction::Exec {
                    command: "ls".into(),
                },
            )
            .await;
        assert_eq!(result.status, ToolStatus::Ok);
        assert_eq!(
            manager.calls(),
            vec!["ensure(Some(\"ntn-old\"), 0)", "exec(ntn-old, ls)"]
        );
    }

    #[tokio::test]
    async fn test_exec_nonzero_exit_is_error() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(FakeManager {
            exit_code: 2,
            ..Default::default()
        });
        let sandbox = tool(manager, dir.path());
        let result = sandbox
            .handle(
                "c1",
                &SandboxAction::Exec {
                    command: "false".into(),
                },
            )
            .await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.output.contains("\"exit_code\":2"));
    }

    #[tokio::test]
    async fn test_status_reports_state_without_container_calls() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(FakeManager::default());
        let sandbox = tool(manager.clone(), dir.path());
        let result = sandbox.handle("c1", &SandboxAction::Status).await;
        assert_eq!(result.status, ToolStatus::Ok);
        assert!(result.output.contains("container_id"));
        assert!(manager.calls().is_empty());
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory("4g").unwrap(), 4 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory("512M").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory("1024").unwrap(), 1024);
        assert!(parse_memory("lots").is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(SandboxConfig::default().validate().is_empty());
        let bad = SandboxConfig {
            workdir: "workspace".into(),
            cpus: 0.0,
            ..SandboxConfig::default()
        };
        assert_eq!(bad.validate().len(), 2);
    }
}
