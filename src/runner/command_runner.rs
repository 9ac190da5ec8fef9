//! Per-instrument command loop.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;
use tracing::{debug, error, info, info_span, warn};

use crate::error::{AppResult, TransferError};
use crate::interpreter::Interpreter;
use crate::journal::{CommandSource, Instrument};
use crate::runner::recorder::SnapshotRecorder;

/// Lifecycle of one runner, published for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    /// Not started
    Idle,
    /// Reading the next command from the run log
    Fetching,
    /// Waiting on preconditions or actuating
    Executing,
    /// Writing the run snapshot
    Persisting,
    /// Command list exhausted
    Done,
    /// Stopped by the operator
    Cancelled,
    /// Stopped by an error
    Failed,
}

impl RunnerState {
    /// True once the runner has stopped for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunnerState::Done | RunnerState::Cancelled | RunnerState::Failed
        )
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunnerState::Idle => "idle",
            RunnerState::Fetching => "fetching",
            RunnerState::Executing => "executing",
            RunnerState::Persisting => "persisting",
            RunnerState::Done => "done",
            RunnerState::Cancelled => "cancelled",
            RunnerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Runs one instrument's commands in ordinal order.
///
/// Runners never talk to each other; they coordinate only through the named
/// states their commands wait on and write.
pub struct CommandRunner {
    instrument: Instrument,
    journal_id: String,
    interpreter: Arc<Interpreter>,
    commands: Arc<dyn CommandSource>,
    recorder: Arc<SnapshotRecorder>,
    /// Next ordinal to run
    cursor: u32,
    state: Arc<watch::Sender<RunnerState>>,
}

impl CommandRunner {
    /// Runner for `instrument` starting at `cursor` (at least 1).
    pub fn new(
        instrument: Instrument,
        interpreter: Arc<Interpreter>,
        commands: Arc<dyn CommandSource>,
        recorder: Arc<SnapshotRecorder>,
        cursor: u32,
    ) -> Self {
        let (state, _) = watch::channel(RunnerState::Idle);
        Self {
            instrument,
            journal_id: recorder.journal_id().to_string(),
            interpreter,
            commands,
            recorder,
            cursor: cursor.max(1),
            state: Arc::new(state),
        }
    }

    /// Publish state through an existing channel instead of a private one.
    pub fn with_state_channel(mut self, state: Arc<watch::Sender<RunnerState>>) -> Self {
        state.send_replace(RunnerState::Idle);
        self.state = state;
        self
    }

    /// Instrument this runner drives.
    pub fn instrument(&self) -> Instrument {
        self.instrument
    }

    /// Next ordinal to run.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Follow the runner's state.
    pub fn subscribe(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    /// Run until the command list is exhausted, `cancel` fires or a command fails.
    ///
    /// A snapshot is written after every command and on every exit path.
    pub async fn run(&mut self, cancel: &CancellationToken) -> AppResult<()> {
        let span = info_span!("runner", instrument = %self.instrument, journal = %self.journal_id);
        self.run_loop(cancel).instrument(span).await
    }

    async fn run_loop(&mut self, cancel: &CancellationToken) -> AppResult<()> {
        info!(cursor = self.cursor, "runner started");
        loop {
            if cancel.is_cancelled() {
                return self.finish(Err(TransferError::Cancelled)).await;
            }

            self.set_state(RunnerState::Fetching);
            let command = match self
                .commands
                .get(&self.journal_id, self.instrument, self.cursor)
                .await
            {
                Ok(Some(command)) => command,
                Ok(None) => return self.finish(Ok(())).await,
                Err(err) => return self.finish(Err(err)).await,
            };

            self.set_state(RunnerState::Executing);
            debug!(ordinal = command.ordinal, text = %command.text, "executing");
            if let Err(err) = self.interpreter.execute(&command, cancel).await {
                return self.finish(Err(err)).await;
            }
            self.cursor += 1;

            self.set_state(RunnerState::Persisting);
            if let Err(err) = self.recorder.record(self.instrument, self.cursor).await {
                self.set_state(RunnerState::Failed);
                error!(error = %err, "failed to persist run snapshot");
                return Err(err);
            }
        }
    }

    /// Persist the stopping cursor and publish the terminal state.
    async fn finish(&mut self, outcome: AppResult<()>) -> AppResult<()> {
        self.set_state(RunnerState::Persisting);
        let saved = self.recorder.record(self.instrument, self.cursor).await;

        let state = match &outcome {
            Ok(()) => {
                info!(cursor = self.cursor, "runner done");
                RunnerState::Done
            }
            Err(err) if err.is_cancelled() => {
                info!(cursor = self.cursor, "runner cancelled");
                RunnerState::Cancelled
            }
            Err(err) => {
                error!(cursor = self.cursor, error = %err, "runner failed");
                RunnerState::Failed
            }
        };

        match (outcome, saved) {
            (Ok(()), Err(save_err)) => {
                self.set_state(RunnerState::Failed);
                Err(save_err)
            }
            (outcome, Err(save_err)) => {
                warn!(error = %save_err, "could not persist stopping snapshot");
                self.set_state(state);
                outcome
            }
            (outcome, Ok(())) => {
                self.set_state(state);
                outcome
            }
        }
    }

    fn set_state(&self, state: RunnerState) {
        self.state.send_replace(state);
    }
}
