//! In-memory run log for tests and embedding.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::{AppResult, TransferError};
use crate::journal::records::{Command, Instrument, Journal, RunSnapshot};
use crate::journal::run_log::{CommandSource, RunLog, SnapshotStore};

#[derive(Default)]
struct Inner {
    journals: BTreeMap<String, Arc<Journal>>,
    snapshots: BTreeMap<String, RunSnapshot>,
    saves: usize,
}

/// Run log kept entirely in memory.
#[derive(Default)]
pub struct MemoryRunLog {
    inner: Mutex<Inner>,
}

impl MemoryRunLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshot writes so far.
    pub fn save_count(&self) -> usize {
        self.inner.lock().saves
    }

    /// Stored snapshot without the fresh-default fallback.
    pub fn snapshot(&self, journal_id: &str) -> Option<RunSnapshot> {
        self.inner.lock().snapshots.get(journal_id).cloned()
    }
}

#[async_trait]
impl CommandSource for MemoryRunLog {
    async fn get(
        &self,
        journal_id: &str,
        instrument: Instrument,
        ordinal: u32,
    ) -> AppResult<Option<Command>> {
        let inner = self.inner.lock();
        let journal = inner
            .journals
            .get(journal_id)
            .ok_or_else(|| TransferError::not_found(format!("journal '{journal_id}'")))?;
        Ok(journal.command(instrument, ordinal))
    }
}

#[async_trait]
impl SnapshotStore for MemoryRunLog {
    async fn save(&self, snapshot: &RunSnapshot) -> AppResult<()> {
        let mut inner = self.inner.lock();
        inner
            .snapshots
            .insert(snapshot.journal_id.clone(), snapshot.clone());
        inner.saves += 1;
        Ok(())
    }

    async fn load_current(&self, journal_id: &str) -> AppResult<RunSnapshot> {
        Ok(self
            .snapshot(journal_id)
            .unwrap_or_else(|| RunSnapshot::fresh(journal_id)))
    }

    async fn load_most_recent_incomplete(&self) -> AppResult<Option<RunSnapshot>> {
        let inner = self.inner.lock();
        Ok(inner
            .snapshots
            .values()
            .filter(|s| !s.completed)
            .max_by_key(|s| s.updated_at)
            .cloned())
    }

    async fn mark_completed(&self, journal_id: &str) -> AppResult<()> {
        let mut inner = self.inner.lock();
        let snapshot = inner.snapshots.get_mut(journal_id).ok_or_else(|| {
            TransferError::not_found(format!("no run snapshot for journal '{journal_id}'"))
        })?;
        snapshot.completed = true;
        snapshot.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl RunLog for MemoryRunLog {
    async fn create_journal(&self, journal: &Journal) -> AppResult<()> {
        journal.validate()?;
        let mut inner = self.inner.lock();
        if inner.journals.contains_key(&journal.id) {
            return Err(TransferError::invalid(format!(
                "journal '{}' already exists",
                journal.id
            )));
        }
        inner
            .journals
            .insert(journal.id.clone(), Arc::new(journal.clone()));
        Ok(())
    }

    async fn journal(&self, journal_id: &str) -> AppResult<Journal> {
        let inner = self.inner.lock();
        inner
            .journals
            .get(journal_id)
            .map(|j| j.as_ref().clone())
            .ok_or_else(|| TransferError::not_found(format!("journal '{journal_id}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_get_commands() {
        let log = MemoryRunLog::new();
        log.create_journal(
            &Journal::new("j1").with_commands(Instrument::LiquidHandler, ["Attach 100"]),
        )
        .await
        .unwrap();

        let cmd = log.get("j1", Instrument::LiquidHandler, 1).await.unwrap();
        assert_eq!(cmd.unwrap().text, "Attach 100");
        assert!(log
            .get("j1", Instrument::LiquidHandler, 2)
            .await
            .unwrap()
            .is_none());
        assert!(log
            .get("j1", Instrument::PlateTransport, 1)
            .await
            .unwrap()
            .is_none());
        let err = log
            .get("nope", Instrument::LiquidHandler, 1)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_duplicate_journal_rejected() {
        let log = MemoryRunLog::new();
        log.create_journal(&Journal::new("j1")).await.unwrap();
        assert!(log.create_journal(&Journal::new("j1")).await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_lifecycle() {
        let log = MemoryRunLog::new();
        let fresh = log.load_current("j1").await.unwrap();
        assert_eq!(fresh.cursor(Instrument::LiquidHandler), 1);
        assert!(log.load_most_recent_incomplete().await.unwrap().is_none());
        assert!(log.mark_completed("j1").await.unwrap_err().is_not_found());

        let mut older = RunSnapshot::fresh("j1");
        older.updated_at = Utc::now() - Duration::seconds(60);
        log.save(&older).await.unwrap();
        let mut newer = RunSnapshot::fresh("j2");
        newer.cursors.insert(Instrument::PlateTransport, 4);
        log.save(&newer).await.unwrap();

        let latest = log.load_most_recent_incomplete().await.unwrap().unwrap();
        assert_eq!(latest.journal_id, "j2");
        assert_eq!(log.load_current("j2").await.unwrap().cursor(Instrument::PlateTransport), 4);

        log.mark_completed("j2").await.unwrap();
        let latest = log.load_most_recent_incomplete().await.unwrap().unwrap();
        assert_eq!(latest.journal_id, "j1");
        assert_eq!(log.save_count(), 2);
    }
}
