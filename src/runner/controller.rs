//! Job lifecycle: start, resume and completion.
//!
//! One controller per workcell. It owns the named-state store, builds a fresh
//! carousel model for every job, and drives one [`CommandRunner`] per
//! instrument concurrently under a job-scoped child of the caller's token, so
//! a failing runner can stop its sibling without cancelling the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::actuation::Actuator;
use crate::config::Settings;
use crate::error::{AppResult, TransferError};
use crate::interpreter::Interpreter;
use crate::journal::{
    CommandSource, Instrument, JobProgress, RunLog, RunSnapshot, SnapshotStore,
};
use crate::labware::{Carousel, PlateLayout};
use crate::runner::command_runner::{CommandRunner, RunnerState};
use crate::runner::recorder::SnapshotRecorder;
use crate::state::{NamedState, StateStore};

/// Outcome of a job that ran to the end of every instrument's list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    /// Journal that ran
    pub journal_id: String,
    /// Final cursor per instrument, one past its last command
    pub cursors: BTreeMap<Instrument, u32>,
    /// Named state at completion
    pub named_state: NamedState,
    /// Plates at completion
    pub layout: PlateLayout,
}

/// Starts and resumes jobs, one at a time, against a run log `L`.
pub struct JobController<L> {
    settings: Settings,
    run_log: Arc<L>,
    actuator: Arc<dyn Actuator>,
    store: Arc<StateStore>,
    states: BTreeMap<Instrument, Arc<watch::Sender<RunnerState>>>,
    running: Mutex<()>,
}

impl<L> JobController<L>
where
    L: RunLog + 'static,
{
    /// Controller for the workcell described by `settings`.
    pub fn new(settings: Settings, run_log: Arc<L>, actuator: Arc<dyn Actuator>) -> Self {
        let states = Instrument::ALL
            .iter()
            .map(|i| (*i, Arc::new(watch::channel(RunnerState::Idle).0)))
            .collect();
        Self {
            settings,
            run_log,
            actuator,
            store: Arc::new(StateStore::new()),
            states,
            running: Mutex::new(()),
        }
    }

    /// Named state of the current or last job.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Run log holding journals and snapshots.
    pub fn run_log(&self) -> &Arc<L> {
        &self.run_log
    }

    /// Live runner state for one instrument.
    pub fn subscribe(&self, instrument: Instrument) -> Option<watch::Receiver<RunnerState>> {
        self.states.get(&instrument).map(|tx| tx.subscribe())
    }

    /// Run a journal from ordinal 1 with freshly reset named state.
    pub async fn start(&self, journal_id: &str, cancel: &CancellationToken) -> AppResult<JobReport> {
        let _running = self.claim()?;
        let journal = self.run_log.journal(journal_id).await?;
        let initial = journal.initial_layout(self.settings.carousel.initial_position);

        self.store.reset();
        let mut snapshot = RunSnapshot::fresh(journal_id);
        snapshot.initial_layout = initial.clone();
        snapshot.current_layout = initial;
        info!(journal = journal_id, "starting job");
        self.run(snapshot, cancel).await
    }

    /// Continue a job from its snapshot: restored state, rebuilt carousel,
    /// each runner at its persisted cursor.
    pub async fn resume(
        &self,
        snapshot: RunSnapshot,
        cancel: &CancellationToken,
    ) -> AppResult<JobReport> {
        let _running = self.claim()?;
        if snapshot.completed {
            return Err(TransferError::invalid(format!(
                "journal '{}' has already completed",
                snapshot.journal_id
            )));
        }

        let mut snapshot = snapshot;
        if snapshot.current_layout == PlateLayout::default() {
            // never persisted: the journal's own plates are the layout
            let journal = self.run_log.journal(&snapshot.journal_id).await?;
            let initial = journal.initial_layout(self.settings.carousel.initial_position);
            snapshot.initial_layout = initial.clone();
            snapshot.current_layout = initial;
        }
        info!(journal = %snapshot.journal_id, cursors = ?snapshot.cursors, "resuming job");
        self.store.restore(&snapshot.named_state);
        self.run(snapshot, cancel).await
    }

    /// Resume the most recently updated unfinished job, if any.
    pub async fn resume_unfinished(
        &self,
        cancel: &CancellationToken,
    ) -> AppResult<Option<JobReport>> {
        match self.run_log.load_most_recent_incomplete().await? {
            Some(snapshot) => self.resume(snapshot, cancel).await.map(Some),
            None => {
                info!("no unfinished job to resume");
                Ok(None)
            }
        }
    }

    fn claim(&self) -> AppResult<tokio::sync::MutexGuard<'_, ()>> {
        self.running
            .try_lock()
            .map_err(|_| TransferError::invalid("a job is already running"))
    }

    async fn run(&self, snapshot: RunSnapshot, cancel: &CancellationToken) -> AppResult<JobReport> {
        let journal_id = snapshot.journal_id.clone();

        // the starting point is durable before the layout is checked or anything moves
        let mut snapshot = snapshot;
        snapshot.updated_at = Utc::now();
        self.run_log.save(&snapshot).await?;

        let carousel =
            Carousel::from_layout(&self.settings.carousel, &snapshot.current_layout)?.shared();
        let progress = Arc::new(JobProgress::new(snapshot.cursors.clone()));

        let snapshots: Arc<dyn SnapshotStore> = self.run_log.clone();
        let commands: Arc<dyn CommandSource> = self.run_log.clone();
        let recorder = Arc::new(SnapshotRecorder::new(
            journal_id.clone(),
            self.store.clone(),
            carousel.clone(),
            snapshots,
            snapshot.initial_layout.clone(),
            progress.clone(),
        ));
        let interpreter = Arc::new(
            Interpreter::new(
                self.store.clone(),
                carousel.clone(),
                self.actuator.clone(),
                &self.settings,
            )
            .with_progress(progress),
        );

        let job = cancel.child_token();
        let runs = Instrument::ALL.iter().map(|instrument| {
            let mut runner = CommandRunner::new(
                *instrument,
                interpreter.clone(),
                commands.clone(),
                recorder.clone(),
                snapshot.cursor(*instrument),
            );
            if let Some(state) = self.states.get(instrument) {
                runner = runner.with_state_channel(state.clone());
            }
            let job = job.clone();
            async move {
                let result = runner.run(&job).await;
                if matches!(&result, Err(err) if !err.is_cancelled()) {
                    // stop the sibling; the caller's token is untouched
                    job.cancel();
                }
                (runner.instrument(), runner.cursor(), result)
            }
        });
        let outcomes = join_all(runs).await;

        let mut cursors = BTreeMap::new();
        let mut failure: Option<TransferError> = None;
        let mut cancelled = false;
        for (instrument, cursor, result) in outcomes {
            cursors.insert(instrument, cursor);
            match result {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => cancelled = true,
                Err(err) => {
                    if failure.is_none() {
                        failure = Some(err);
                    } else {
                        warn!(%instrument, error = %err, "additional runner failure");
                    }
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }
        if cancelled {
            info!(journal = %journal_id, ?cursors, "job stopped");
            return Err(TransferError::Cancelled);
        }

        self.run_log.mark_completed(&journal_id).await?;
        info!(journal = %journal_id, "job completed");
        let layout = carousel.lock().layout();
        Ok(JobReport {
            journal_id,
            cursors,
            named_state: self.store.serialize(),
            layout,
        })
    }
}
