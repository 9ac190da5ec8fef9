//! JSON-file run log.
//!
//! Layout under the configured directory:
//!
//! ```text
//! journals/<journal-id>.json
//! snapshots/<journal-id>.json
//! ```
//!
//! Snapshots are written to a temporary file, synced, then renamed over the
//! previous one so a crash never leaves a half-written snapshot behind.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{AppResult, TransferError};
use crate::journal::records::{validate_id, Command, Instrument, Journal, RunSnapshot};
use crate::journal::run_log::{CommandSource, RunLog, SnapshotStore};

const JOURNALS_DIR: &str = "journals";
const SNAPSHOTS_DIR: &str = "snapshots";

/// Run log stored as JSON files in one directory.
pub struct FileRunLog {
    root: PathBuf,
    /// Journals are immutable once created, so they are read from disk once.
    journals: Mutex<HashMap<String, Arc<Journal>>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileRunLog {
    /// Open (and create if needed) a run log rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(JOURNALS_DIR)).await?;
        fs::create_dir_all(root.join(SNAPSHOTS_DIR)).await?;
        debug!(root = %root.display(), "run log opened");
        Ok(Self {
            root,
            journals: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Directory the log lives in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn journal_path(&self, journal_id: &str) -> PathBuf {
        self.root.join(JOURNALS_DIR).join(format!("{journal_id}.json"))
    }

    fn snapshot_path(&self, journal_id: &str) -> PathBuf {
        self.root
            .join(SNAPSHOTS_DIR)
            .join(format!("{journal_id}.json"))
    }

    async fn cached_journal(&self, journal_id: &str) -> AppResult<Arc<Journal>> {
        if let Some(journal) = self.journals.lock().get(journal_id) {
            return Ok(journal.clone());
        }
        validate_id(journal_id)?;
        let journal: Journal = read_json(&self.journal_path(journal_id))
            .await?
            .ok_or_else(|| TransferError::not_found(format!("journal '{journal_id}'")))?;
        let journal = Arc::new(journal);
        self.journals
            .lock()
            .insert(journal_id.to_string(), journal.clone());
        Ok(journal)
    }

    async fn stored_snapshot(&self, journal_id: &str) -> AppResult<Option<RunSnapshot>> {
        validate_id(journal_id)?;
        read_json(&self.snapshot_path(journal_id)).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> AppResult<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    let data = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(&data).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[async_trait]
impl CommandSource for FileRunLog {
    async fn get(
        &self,
        journal_id: &str,
        instrument: Instrument,
        ordinal: u32,
    ) -> AppResult<Option<Command>> {
        let journal = self.cached_journal(journal_id).await?;
        Ok(journal.command(instrument, ordinal))
    }
}

#[async_trait]
impl SnapshotStore for FileRunLog {
    async fn save(&self, snapshot: &RunSnapshot) -> AppResult<()> {
        validate_id(&snapshot.journal_id)?;
        let _guard = self.write_lock.lock().await;
        write_json_atomic(&self.snapshot_path(&snapshot.journal_id), snapshot).await
    }

    async fn load_current(&self, journal_id: &str) -> AppResult<RunSnapshot> {
        Ok(self
            .stored_snapshot(journal_id)
            .await?
            .unwrap_or_else(|| RunSnapshot::fresh(journal_id)))
    }

    async fn load_most_recent_incomplete(&self) -> AppResult<Option<RunSnapshot>> {
        let mut newest: Option<RunSnapshot> = None;
        let mut entries = fs::read_dir(self.root.join(SNAPSHOTS_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let snapshot: RunSnapshot = match read_json(&path).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => continue,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable snapshot");
                    continue;
                }
            };
            if snapshot.completed {
                continue;
            }
            if newest
                .as_ref()
                .map_or(true, |n| snapshot.updated_at > n.updated_at)
            {
                newest = Some(snapshot);
            }
        }
        Ok(newest)
    }

    async fn mark_completed(&self, journal_id: &str) -> AppResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut snapshot = self.stored_snapshot(journal_id).await?.ok_or_else(|| {
            TransferError::not_found(format!("no run snapshot for journal '{journal_id}'"))
        })?;
        snapshot.completed = true;
        snapshot.updated_at = Utc::now();
        write_json_atomic(&self.snapshot_path(journal_id), &snapshot).await
    }
}

#[async_trait]
impl RunLog for FileRunLog {
    async fn create_journal(&self, journal: &Journal) -> AppResult<()> {
        journal.validate()?;
        let _guard = self.write_lock.lock().await;
        let path = self.journal_path(&journal.id);
        if fs::try_exists(&path).await? {
            return Err(TransferError::invalid(format!(
                "journal '{}' already exists",
                journal.id
            )));
        }
        write_json_atomic(&path, journal).await?;
        debug!(journal = %journal.id, "journal created");
        Ok(())
    }

    async fn journal(&self, journal_id: &str) -> AppResult<Journal> {
        Ok(self.cached_journal(journal_id).await?.as_ref().clone())
    }
}
