//! Command interpreter.
//!
//! Turns one journal line into a [`Plan`] (precondition groups, claims, one
//! actuation, effects) and runs it against the shared [`StateStore`]. The
//! liquid-handler and transport tables live in their own modules; this module
//! holds the parts both share.

pub mod command;
mod liquid;
pub mod plan;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::actuation::{Action, Actuator};
use crate::config::Settings;
use crate::error::{AppResult, TransferError};
use crate::journal::{Command, JobProgress};
use crate::labware::SharedCarousel;
use crate::state::StateStore;

pub use command::{parse, ParsedCommand, Site, ToolCommand, ToolVerb, TransportCommand};
pub use plan::{Condition, Plan};

/// Executes commands for any instrument against shared state and labware.
pub struct Interpreter {
    store: Arc<StateStore>,
    carousel: SharedCarousel,
    actuator: Arc<dyn Actuator>,
    tools: Vec<String>,
    timeout: Option<Duration>,
    progress: Arc<JobProgress>,
}

impl Interpreter {
    /// Interpreter with its own progress record; see [`Interpreter::with_progress`].
    pub fn new(
        store: Arc<StateStore>,
        carousel: SharedCarousel,
        actuator: Arc<dyn Actuator>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            carousel,
            actuator,
            tools: settings.liquid_handler.tools.clone(),
            timeout: settings.actuation.timeout(),
            progress: Arc::new(JobProgress::default()),
        }
    }

    /// Complete commands against `progress`, shared with the job's snapshot recorder.
    pub fn with_progress(mut self, progress: Arc<JobProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Cursors this interpreter advances as commands complete.
    pub fn progress(&self) -> &Arc<JobProgress> {
        &self.progress
    }

    /// Named state the commands wait on and write.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Carousel model the transport commands move plates through.
    pub fn carousel(&self) -> &SharedCarousel {
        &self.carousel
    }

    /// Parse and run one command.
    ///
    /// Blocks on preconditions for as long as it takes; only `cancel` bounds the
    /// wait. Nothing after the claims is undone on failure.
    pub async fn execute(&self, command: &Command, cancel: &CancellationToken) -> AppResult<()> {
        match parse(command.instrument, &command.text)? {
            ParsedCommand::Tool(cmd) => self.execute_tool(command, &cmd, cancel).await,
            ParsedCommand::Transport(cmd) => self.execute_transport(command, &cmd, cancel).await,
        }
    }

    async fn await_group(&self, group: &[Condition], cancel: &CancellationToken) -> AppResult<()> {
        trace!(conditions = group.len(), "awaiting precondition group");
        if let [single] = group {
            return self
                .store
                .wait_for_state(&single.scope, single.key, single.value, cancel)
                .await;
        }
        try_join_all(
            group
                .iter()
                .map(|c| self.store.wait_for_state(&c.scope, c.key, c.value, cancel)),
        )
        .await?;
        Ok(())
    }

    async fn await_preconditions(
        &self,
        groups: &[Vec<Condition>],
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        for group in groups {
            self.await_group(group, cancel).await?;
        }
        Ok(())
    }

    fn apply(&self, writes: &[Condition]) {
        for write in writes {
            self.store.set_state(&write.scope, write.key, write.value);
        }
    }

    async fn actuate(&self, action: &Action, cancel: &CancellationToken) -> AppResult<()> {
        debug!(%action, verb = action.verb(), "actuating");
        match self.timeout {
            Some(after) => tokio::time::timeout(after, self.actuator.actuate(action, cancel))
                .await
                .map_err(|_| TransferError::Timeout {
                    action: action.to_string(),
                    after,
                })?,
            None => self.actuator.actuate(action, cancel).await,
        }
    }

    /// Run a plan; `on_success` runs between a successful actuation and the effects.
    async fn run_plan<F>(
        &self,
        origin: &Command,
        plan: &Plan,
        cancel: &CancellationToken,
        on_success: F,
    ) -> AppResult<()>
    where
        F: FnOnce() -> AppResult<()> + Send,
    {
        self.await_preconditions(&plan.preconditions, cancel).await?;
        self.commit(origin, plan, cancel, on_success).await
    }

    /// Claims, actuation, then `on_success` and the effects as the step that
    /// completes `origin`. Preconditions must already hold.
    async fn commit<F>(
        &self,
        origin: &Command,
        plan: &Plan,
        cancel: &CancellationToken,
        on_success: F,
    ) -> AppResult<()>
    where
        F: FnOnce() -> AppResult<()> + Send,
    {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        self.apply(&plan.claims);
        self.actuate(&plan.action, cancel).await?;
        self.progress
            .complete(origin.instrument, origin.ordinal, || {
                on_success()?;
                self.apply(&plan.effects);
                Ok(())
            })
    }
}
