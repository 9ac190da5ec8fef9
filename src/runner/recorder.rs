//! Run snapshot bookkeeping shared by the runners of one job.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::AppResult;
use crate::journal::{Instrument, JobProgress, RunSnapshot, SnapshotStore};
use crate::labware::{PlateLayout, SharedCarousel};
use crate::state::StateStore;

/// Builds and saves the job's snapshot whenever a runner moves its cursor.
///
/// Saves are serialized so a slower write can never overwrite a newer one.
/// Each snapshot is read under the job's [`JobProgress`] lock, the same lock
/// a command holds while writing its effects and advancing its cursor.
pub struct SnapshotRecorder {
    journal_id: String,
    store: Arc<StateStore>,
    carousel: SharedCarousel,
    snapshots: Arc<dyn SnapshotStore>,
    initial_layout: PlateLayout,
    progress: Arc<JobProgress>,
    saving: Mutex<()>,
}

impl SnapshotRecorder {
    /// Recorder for one job, reading cursors from `progress`.
    pub fn new(
        journal_id: impl Into<String>,
        store: Arc<StateStore>,
        carousel: SharedCarousel,
        snapshots: Arc<dyn SnapshotStore>,
        initial_layout: PlateLayout,
        progress: Arc<JobProgress>,
    ) -> Self {
        Self {
            journal_id: journal_id.into(),
            store,
            carousel,
            snapshots,
            initial_layout,
            progress,
            saving: Mutex::new(()),
        }
    }

    /// Journal being recorded.
    pub fn journal_id(&self) -> &str {
        &self.journal_id
    }

    /// Store `cursor` for `instrument` and save a full snapshot.
    pub async fn record(&self, instrument: Instrument, cursor: u32) -> AppResult<()> {
        let _saving = self.saving.lock().await;
        self.progress.set(instrument, cursor);
        let snapshot = self.build();
        self.snapshots.save(&snapshot).await?;
        trace!(journal = %self.journal_id, %instrument, cursor, "snapshot saved");
        Ok(())
    }

    fn build(&self) -> RunSnapshot {
        self.progress.read(|cursors| RunSnapshot {
            journal_id: self.journal_id.clone(),
            cursors: cursors.clone(),
            named_state: self.store.serialize(),
            initial_layout: self.initial_layout.clone(),
            current_layout: self.carousel.lock().layout(),
            completed: false,
            updated_at: Utc::now(),
        })
    }
}
