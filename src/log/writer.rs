//! Append-only, synchronously flushed session log writer.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, warn};

use super::schema::{Block, LogRecord, SessionHeader};
use crate::errors::LogError;

/// Exclusive writer for one session log.
///
/// The file is locked for the writer's lifetime so no second session can append to
/// it. `write_block` returns only after the block is on stable storage; a crash loses at
/// most the block being written.
#[derive(Debug)]
pub struct LogWriter {
    path: PathBuf,
    file: File,
    next_seq: u64,
    preserved_tail: Option<PathBuf>,
}

/// Where complete lines past the trusted prefix are kept when a log is resumed.
pub fn untrusted_tail_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".untrusted");
    path.with_file_name(name)
}

impl LogWriter {
    /// Create a new log and write its `SESSION` header as block 1.
    pub fn create(path: &Path, header: SessionHeader) -> Result<Self, LogError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|source| LogError::io("create directory for", parent, source))?;
        }
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)
            .map_err(|source| LogError::io("create", path, source))?;
        lock(&file, path)?;

        let mut writer = Self {
            path: path.to_path_buf(),
            file,
            next_seq: 1,
            preserved_tail: None,
        };
        writer.write_block(&Block::Session(header))?;
        Ok(writer)
    }

    /// Reopen an existing log for appending after replay.
    ///
    /// `trusted_len` is the byte length of the prefix replay accepted. A torn final
    /// line is cut so new blocks start on a clean line. Complete lines past the prefix
    /// (corruption or grammar violations) are copied to [`untrusted_tail_path`] before
    /// the cut, so nothing that reached the disk as a whole block is lost.
    pub fn resume(path: &Path, trusted_len: u64, next_seq: u64) -> Result<Self, LogError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| LogError::io("open", path, source))?;
        lock(&file, path)?;

        let actual_len = file
            .metadata()
            .map_err(|source| LogError::io("stat", path, source))?
            .len();
        let mut preserved_tail = None;
        if actual_len > trusted_len {
            file.seek(SeekFrom::Start(trusted_len))
                .map_err(|source| LogError::io("seek", path, source))?;
            let mut tail = Vec::new();
            file.read_to_end(&mut tail)
                .map_err(|source| LogError::io("read", path, source))?;

            if tail.contains(&b'\n') {
                let sidecar = untrusted_tail_path(path);
                preserve_tail(&sidecar, &tail)?;
                warn!(
                    path = %path.display(),
                    sidecar = %sidecar.display(),
                    preserved_bytes = tail.len(),
                    "Moved untrusted blocks out of session log"
                );
                preserved_tail = Some(sidecar);
            } else {
                warn!(
                    path = %path.display(),
                    discarded_bytes = tail.len(),
                    "Discarding torn final line of session log"
                );
            }
            file.set_len(trusted_len)
                .map_err(|source| LogError::io("truncate", path, source))?;
            file.sync_data()
                .map_err(|source| LogError::io("sync", path, source))?;
        }
        file.seek(SeekFrom::End(0))
            .map_err(|source| LogError::io("seek", path, source))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            next_seq,
            preserved_tail,
        })
    }

    /// Append one block and flush it to stable storage. Returns the block's sequence number.
    pub fn write_block(&mut self, block: &Block) -> Result<u64, LogError> {
        let record = LogRecord {
            seq: self.next_seq,
            ts: Utc::now(),
            block: block.clone(),
        };
        let mut line = serde_json::to_string(&record).map_err(LogError::Encode)?;
        line.push('\n');

        self.file
            .write_all(line.as_bytes())
            .map_err(|source| LogError::io("append to", &self.path, source))?;
        self.file
            .sync_data()
            .map_err(|source| LogError::io("sync", &self.path, source))?;

        debug!(seq = record.seq, kind = block.label(), "Wrote log block");
        self.next_seq += 1;
        Ok(record.seq)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Sidecar file holding complete blocks moved out of the log by `resume`.
    pub fn preserved_tail(&self) -> Option<&Path> {
        self.preserved_tail.as_deref()
    }
}

fn preserve_tail(sidecar: &Path, tail: &[u8]) -> Result<(), LogError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(sidecar)
        .map_err(|source| LogError::io("create", sidecar, source))?;
    file.write_all(tail)
        .map_err(|source| LogError::io("append to", sidecar, source))?;
    if !tail.ends_with(b"\n") {
        file.write_all(b"\n")
            .map_err(|source| LogError::io("append to", sidecar, source))?;
    }
    file.sync_data()
        .map_err(|source| LogError::io("sync", sidecar, source))
}

fn lock(file: &File, path: &Path) -> Result<(), LogError> {
    file.try_lock_exclusive().map_err(|_| LogError::Locked {
        path: path.to_path_buf(),
    })
}
