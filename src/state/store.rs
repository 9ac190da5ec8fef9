//! Named-state store with a wait/signal registry.
//!
//! Every `(scope, key)` owns a bucket: the current value plus the flows parked
//! on it. Checking the value and registering a waiter happen under the bucket's
//! lock, and `set_state` writes the value and releases matching waiters under
//! the same lock, so a wakeup can never fall between the check and the park.
//! Each released waiter receives the value written by the call that released
//! it, not whatever the key holds by the time it is scheduled.
//!
//! Lock order is always the scope map first, then a single bucket. No lock is
//! held across an `.await`.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{AppResult, TransferError};
use crate::state::scope::{NamedState, Scope};

struct Waiter {
    expected: bool,
    tx: oneshot::Sender<bool>,
}

#[derive(Default)]
struct Bucket {
    /// `None` means the key is absent, which reads as `false`.
    value: Option<bool>,
    waiters: Vec<Waiter>,
}

impl Bucket {
    fn current(&self) -> bool {
        self.value.unwrap_or(false)
    }

    /// Store a value and release every waiter expecting it. Returns the number released.
    fn write(&mut self, value: Option<bool>) -> usize {
        self.value = value;
        let current = self.current();
        let mut released = 0;
        let mut kept = Vec::with_capacity(self.waiters.len());
        for waiter in self.waiters.drain(..) {
            if waiter.expected == current {
                if waiter.tx.send(current).is_ok() {
                    released += 1;
                }
            } else if !waiter.tx.is_closed() {
                kept.push(waiter);
            }
        }
        self.waiters = kept;
        released
    }

    fn parked(&self) -> usize {
        self.waiters.iter().filter(|w| !w.tx.is_closed()).count()
    }
}

type BucketRef = Arc<Mutex<Bucket>>;

#[derive(Default)]
struct ScopeEntry {
    /// Whether the scope is part of the serialized state
    listed: bool,
    keys: BTreeMap<String, BucketRef>,
}

/// Shared boolean world state for all runners of one workcell.
#[derive(Default)]
pub struct StateStore {
    scopes: RwLock<BTreeMap<Scope, ScopeEntry>>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("state", &self.serialize())
            .finish()
    }
}

impl StateStore {
    /// Store with every state absent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value; absent keys are `false`.
    pub fn get(&self, scope: &Scope, key: &str) -> bool {
        let scopes = self.scopes.read();
        scopes
            .get(scope)
            .and_then(|entry| entry.keys.get(key))
            .map(|bucket| bucket.lock().current())
            .unwrap_or(false)
    }

    /// Store a value and release all flows waiting for exactly this value.
    pub fn set_state(&self, scope: &Scope, key: &str, value: bool) {
        let bucket = self.bucket(scope, key, true);
        let released = bucket.lock().write(Some(value));
        trace!(%scope, key, value, released, "state set");
    }

    /// Wait until `(scope, key)` equals `expected`.
    ///
    /// Returns at once when the value already matches. Otherwise parks until a
    /// matching `set_state` or until `cancel` fires, whichever comes first.
    pub async fn wait_for_state(
        &self,
        scope: &Scope,
        key: &str,
        expected: bool,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let rx = {
            let bucket = self.bucket(scope, key, false);
            let mut guard = bucket.lock();
            if guard.current() == expected {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            let (tx, rx) = oneshot::channel();
            guard.waiters.retain(|w| !w.tx.is_closed());
            guard.waiters.push(Waiter { expected, tx });
            rx
        };
        trace!(%scope, key, expected, "waiting for state");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            released = rx => match released {
                Ok(value) => {
                    debug_assert_eq!(value, expected);
                    Ok(())
                }
                Err(_) => Err(TransferError::invalid(format!(
                    "waiter for {scope}.{key} dropped without a signal"
                ))),
            },
        }
    }

    /// Number of flows currently parked on `(scope, key)`.
    pub fn parked(&self, scope: &Scope, key: &str) -> usize {
        let scopes = self.scopes.read();
        scopes
            .get(scope)
            .and_then(|entry| entry.keys.get(key))
            .map(|bucket| bucket.lock().parked())
            .unwrap_or(0)
    }

    /// Snapshot of every listed scope and every present key.
    pub fn serialize(&self) -> NamedState {
        let scopes = self.scopes.read();
        scopes
            .iter()
            .filter(|(_, entry)| entry.listed)
            .map(|(scope, entry)| {
                let values = entry
                    .keys
                    .iter()
                    .filter_map(|(key, bucket)| bucket.lock().value.map(|v| (key.clone(), v)))
                    .collect();
                (scope.clone(), values)
            })
            .collect()
    }

    /// Replace the whole state with `state`.
    ///
    /// Keys missing from `state` become absent. Parked flows whose expectation
    /// matches the restored value are released.
    pub fn restore(&self, state: &NamedState) {
        let mut scopes = self.scopes.write();
        for (scope, entry) in scopes.iter_mut() {
            let incoming = state.get(scope);
            entry.listed = incoming.is_some();
            for (key, bucket) in &entry.keys {
                let value = incoming.and_then(|values| values.get(key)).copied();
                bucket.lock().write(value);
            }
        }
        for (scope, values) in state {
            let entry = scopes.entry(scope.clone()).or_default();
            entry.listed = true;
            for (key, value) in values {
                let bucket = entry.keys.entry(key.clone()).or_default();
                bucket.lock().write(Some(*value));
            }
        }
    }

    /// Clear every state back to absent, as at the start of a new job.
    pub fn reset(&self) {
        self.restore(&NamedState::new());
    }

    /// [`StateStore::serialize`] as JSON.
    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(&self.serialize())?)
    }

    /// [`StateStore::restore`] from JSON written by [`StateStore::to_json`].
    pub fn restore_json(&self, json: &str) -> AppResult<()> {
        let state: NamedState = serde_json::from_str(json)?;
        self.restore(&state);
        Ok(())
    }

    fn bucket(&self, scope: &Scope, key: &str, list: bool) -> BucketRef {
        {
            let scopes = self.scopes.read();
            if let Some(entry) = scopes.get(scope) {
                if entry.listed || !list {
                    if let Some(bucket) = entry.keys.get(key) {
                        return bucket.clone();
                    }
                }
            }
        }
        let mut scopes = self.scopes.write();
        let entry = scopes.entry(scope.clone()).or_default();
        if list {
            entry.listed = true;
        }
        entry.keys.entry(key.to_string()).or_default().clone()
    }
}
