use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::events::Event;

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize event: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append to log file {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Append-only JSONL event log: one global file plus one file per target
/// repo, mirroring this workspace's task-scoped event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonlEventLog {
    pub root: PathBuf,
    pub global_file: PathBuf,
    pub target_dir: PathBuf,
}

impl JsonlEventLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let global_file = root.join("global.jsonl");
        let target_dir = root.join("targets");
        Self {
            root,
            global_file,
            target_dir,
        }
    }

    pub fn ensure_layout(&self) -> Result<(), EventLogError> {
        fs::create_dir_all(&self.root).map_err(|source| EventLogError::CreateDir {
            path: self.root.clone(),
            source,
        })?;
        fs::create_dir_all(&self.target_dir).map_err(|source| EventLogError::CreateDir {
            path: self.target_dir.clone(),
            source,
        })?;
        Ok(())
    }

    pub fn append_global(&self, event: &Event) -> Result<(), EventLogError> {
        append_json_line(&self.global_file, event)
    }

    pub fn append_target(&self, event: &Event) -> Result<(), EventLogError> {
        if let Some(repo) = &event.target_repo {
            let file = self.target_dir.join(format!("{}.jsonl", sanitize(repo)));
            append_json_line(&file, event)?;
        }
        Ok(())
    }

    pub fn append_both(&self, event: &Event) -> Result<(), EventLogError> {
        self.ensure_layout()?;
        self.append_global(event)?;
        self.append_target(event)?;
        Ok(())
    }

    pub fn target_log_path(&self, repo: &str) -> PathBuf {
        self.target_dir.join(format!("{}.jsonl", sanitize(repo)))
    }

    pub fn global_log_path(&self) -> &Path {
        self.global_file.as_path()
    }
}

fn sanitize(repo: &str) -> String {
    repo.replace('/', "__")
}

fn append_json_line(path: &Path, event: &Event) -> Result<(), EventLogError> {
    let line = serde_json::to_string(event).map_err(|source| EventLogError::Serialize { source })?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })?;

    file.write_all(line.as_bytes())
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })?;
    file.write_all(b"\n").map_err(|source| EventLogError::Append {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
