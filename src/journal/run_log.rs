//! Run log boundary.
//!
//! The run log holds the planned journals and the current snapshot of each run.
//! Runners only need the two narrow traits; the job controller needs the whole
//! [`RunLog`].

use async_trait::async_trait;

use crate::error::AppResult;
use crate::journal::records::{Command, Instrument, Journal, RunSnapshot};

/// Supplies commands by `(journal, instrument, ordinal)`.
#[async_trait]
pub trait CommandSource: Send + Sync {
    /// The command at `ordinal`, or `Ok(None)` once the instrument's list is exhausted.
    ///
    /// An unknown journal is a `NotFound` error.
    async fn get(
        &self,
        journal_id: &str,
        instrument: Instrument,
        ordinal: u32,
    ) -> AppResult<Option<Command>>;
}

/// Durable storage for run snapshots, one current snapshot per journal.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or replace the snapshot for `snapshot.journal_id`.
    async fn save(&self, snapshot: &RunSnapshot) -> AppResult<()>;

    /// Latest snapshot, or a fresh one starting every instrument at ordinal 1.
    async fn load_current(&self, journal_id: &str) -> AppResult<RunSnapshot>;

    /// Newest snapshot that is not completed.
    async fn load_most_recent_incomplete(&self) -> AppResult<Option<RunSnapshot>>;

    /// Flag the journal's snapshot as finished.
    async fn mark_completed(&self, journal_id: &str) -> AppResult<()>;
}

/// Full run log: journals plus snapshots.
#[async_trait]
pub trait RunLog: CommandSource + SnapshotStore {
    /// Store a new journal; ids are never reused.
    async fn create_journal(&self, journal: &Journal) -> AppResult<()>;

    /// The planned journal, or `NotFound`.
    async fn journal(&self, journal_id: &str) -> AppResult<Journal>;
}
