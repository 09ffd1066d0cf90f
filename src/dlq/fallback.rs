//! Local directory fallback for dead-letter messages.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, warn};

use crate::errors::{PipelineError, PipelineResult};
use crate::types::DlqMessage;

fn storage_error(context: &str, path: &Path, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::DeadLetterStorage {
        message: format!("{} {}: {}", context, path.display(), err),
    }
}

/// Directory holding one JSON file per dead-lettered item.
///
/// Files are named `<type>_<YYYYMMDDTHHMMSS.ffffff>_<pid>_<counter>.json`
/// and are written under a temporary name first, then renamed into place.
/// The directory is created on first write.
#[derive(Debug)]
pub struct LocalFallbackStore {
    dir: PathBuf,
    counter: AtomicU64,
}

impl LocalFallbackStore {
    /// Creates a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// Returns the directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(&self, message: &DlqMessage) -> String {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        format!(
            "{}_{}_{}_{:020}.json",
            message.item_type,
            message.enqueued_at.format("%Y%m%dT%H%M%S%.6f"),
            std::process::id(),
            counter
        )
    }

    /// Writes `message` to a new file and returns its path.
    pub async fn write(&self, message: &DlqMessage) -> PipelineResult<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_error("Failed to create", &self.dir, e))?;

        let name = self.file_name(message);
        let path = self.dir.join(&name);
        let temp = self.dir.join(format!(".{}.tmp", name));
        let contents = serde_json::to_vec_pretty(message)?;

        fs::write(&temp, contents)
            .await
            .map_err(|e| storage_error("Failed to write", &temp, e))?;
        if let Err(err) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(storage_error("Failed to rename", &temp, err));
        }

        debug!(path = %path.display(), "Wrote fallback file");
        Ok(path)
    }

    /// Lists stored messages oldest first, with their paths.
    ///
    /// Unreadable or corrupt files are logged and skipped. A missing
    /// directory yields an empty list.
    pub async fn list(&self) -> PipelineResult<Vec<(PathBuf, DlqMessage)>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(storage_error("Failed to read", &self.dir, err)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("Failed to read", &self.dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") && !name.starts_with('.') {
                names.push(name);
            }
        }
        // Order by the part after the item type so both types interleave by time.
        names.sort_by(|a, b| {
            let key = |n: &str| n.split_once('_').map(|(_, rest)| rest.to_string());
            key(a).cmp(&key(b)).then_with(|| a.cmp(b))
        });

        let mut messages = Vec::with_capacity(names.len());
        for name in names {
            let path = self.dir.join(&name);
            let contents = match fs::read(&path).await {
                Ok(contents) => contents,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable fallback file");
                    continue;
                }
            };
            match serde_json::from_slice::<DlqMessage>(&contents) {
                Ok(message) => messages.push((path, message)),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping corrupt fallback file");
                }
            }
        }
        Ok(messages)
    }

    /// Hides a stored file from [`list`](Self::list) by renaming it to a
    /// dot-prefixed `.sending` name, and returns the new path.
    pub async fn claim(&self, path: &Path) -> PipelineResult<PathBuf> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| storage_error("Not a fallback file", path, "no file name"))?;
        let claimed = self.dir.join(format!(".{}.sending", name));
        fs::rename(path, &claimed)
            .await
            .map_err(|e| storage_error("Failed to claim", path, e))?;
        Ok(claimed)
    }

    /// Moves a claimed file back to its listed name.
    pub async fn release(&self, claimed: &Path, path: &Path) -> PipelineResult<()> {
        fs::rename(claimed, path)
            .await
            .map_err(|e| storage_error("Failed to release", claimed, e))
    }

    /// Deletes a stored file.
    pub async fn remove(&self, path: &Path) -> PipelineResult<()> {
        fs::remove_file(path)
            .await
            .map_err(|e| storage_error("Failed to remove", path, e))
    }
}
