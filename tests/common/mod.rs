//! Common test utilities for pin_transfer integration tests
//!
//! This module provides reusable test helpers for:
//! - Settings with instant simulated motion
//! - A two-replicate demo journal exercising both runners
//! - Actuators that record, or stop the job after a number of actions
//! - Polling helpers for parked waiters

#![allow(dead_code)] // Not every test binary uses every helper

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use pin_transfer::actuation::{Action, Actuator, SimulatedActuator};
use pin_transfer::config::{Settings, SimulatedDelays};
use pin_transfer::journal::{Instrument, Journal};
use pin_transfer::labware::{Plate, SlotAddress};
use pin_transfer::state::{Scope, StateStore};
use pin_transfer::AppResult;

/// Default six-hotel workcell with every motion completing immediately.
pub fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.actuation.simulated = SimulatedDelays::instant();
    settings
}

/// One source plate pinned into two destination plates with tool 100.
pub fn demo_journal(id: &str) -> Journal {
    Journal::new(id)
        .with_commands(
            Instrument::LiquidHandler,
            [
                "Attach 100",
                "Wash 100",
                "Transfer 100",
                "Move Safe 100",
                "Wash 100",
                "Transfer 100",
                "Move Safe 100",
                "Wash 100",
                "Detach 100",
            ],
        )
        .with_commands(
            Instrument::PlateTransport,
            [
                "MoveHome",
                "Get source src-001 from stack",
                "Set source src-001 to stage",
                "Get destination dst-001 from stack",
                "Set destination dst-001 to stage",
                "MoveSafe",
                "Get destination dst-001 from stage",
                "Set destination dst-001 to stack",
                "Get destination dst-002 from stack",
                "Set destination dst-002 to stage",
                "MoveSafe",
                "Get destination dst-002 from stage",
                "Set destination dst-002 to stack",
                "Get source src-001 from stage",
                "Set source src-001 to stack",
                "MoveHome",
            ],
        )
        .with_plate(Plate::source("src-001", 50, 2, SlotAddress::new(1, 1)))
        .with_plate(Plate::destination("dst-001", SlotAddress::new(4, 1)))
        .with_plate(
            Plate::destination("dst-002", SlotAddress::new(4, 2))
                .with_target(SlotAddress::new(5, 1)),
        )
}

/// Instant actuator that cancels `stop` once `limit` actions have completed.
pub struct StopAfter {
    inner: SimulatedActuator,
    limit: usize,
    done: AtomicUsize,
    stop: CancellationToken,
}

impl StopAfter {
    pub fn new(limit: usize, stop: CancellationToken) -> Self {
        Self {
            inner: SimulatedActuator::instant(),
            limit,
            done: AtomicUsize::new(0),
            stop,
        }
    }

    pub fn history(&self) -> Vec<Action> {
        self.inner.history()
    }
}

#[async_trait]
impl Actuator for StopAfter {
    async fn actuate(&self, action: &Action, cancel: &CancellationToken) -> AppResult<()> {
        self.inner.actuate(action, cancel).await?;
        if self.done.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
            self.stop.cancel();
        }
        Ok(())
    }
}

/// Instant actuator that records every action it is asked to perform,
/// including ones that are later cancelled.
#[derive(Default)]
pub struct RequestLog {
    requested: Mutex<Vec<Action>>,
}

impl RequestLog {
    pub fn requested(&self) -> Vec<Action> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl Actuator for RequestLog {
    async fn actuate(&self, action: &Action, _cancel: &CancellationToken) -> AppResult<()> {
        self.requested.lock().push(action.clone());
        Ok(())
    }
}

/// Display strings of `actions`, sorted, for order-insensitive comparison.
pub fn sorted_names(actions: &[Action]) -> Vec<String> {
    let mut names: Vec<String> = actions.iter().map(ToString::to_string).collect();
    names.sort();
    names
}

/// Wait until at least `count` flows are parked on `(scope, key)`.
pub async fn until_parked(store: &StateStore, scope: &Scope, key: &str, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.parked(scope, key) < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {count} waiter(s) on {scope}.{key}"));
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
