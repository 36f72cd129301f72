use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

pub const NTN_DIR: &str = ".ntn";
pub const SESSION_DIR: [&str; 2] = [NTN_DIR, "sessions"];

#[must_use]
pub fn session_root(project_dir: &Path) -> PathBuf {
    project_dir.join(SESSION_DIR[0]).join(SESSION_DIR[1])
}

#[must_use]
pub fn sanitize_timestamp_for_filename(timestamp: &str) -> String {
    timestamp
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | ' ' => '-',
            _ => c,
        })
        .collect()
}

/// `<created_at>_<session_id>.jsonl`, so lexical order is creation order.
#[must_use]
pub fn session_file_name(created_at: &DateTime<Utc>, session_id: &str) -> String {
    format!(
        "{}_{}.jsonl",
        sanitize_timestamp_for_filename(&created_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        session_id
    )
}

/// All session logs under the project, newest first.
pub fn list_sessions(project_dir: &Path) -> Result<Vec<PathBuf>> {
    let root = session_root(project_dir);
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(&root)
        .with_context(|| format!("Failed to list sessions in {}", root.display()))?
    {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "jsonl") {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(paths)
}

pub fn latest_session(project_dir: &Path) -> Result<Option<PathBuf>> {
    Ok(list_sessions(project_dir)?.into_iter().next())
}

/// Resolve a `--resume` / `show` argument: `latest`, a path, or a log file name.
pub fn resolve_session_arg(project_dir: &Path, arg: &str) -> Result<PathBuf> {
    if arg == "latest" {
        return latest_session(project_dir)?.with_context(|| {
            format!(
                "No sessions found under {}",
                session_root(project_dir).display()
            )
        });
    }
    let path = PathBuf::from(arg);
    let path = if path.is_absolute() {
        path
    } else if project_dir.join(&path).exists() {
        project_dir.join(path)
    } else {
        // Bare file names as printed at the end of a session.
        session_root(project_dir).join(path)
    };
    if !path.exists() {
        anyhow::bail!("Session log not found: {}", path.display());
    }
    Ok(path)
}
