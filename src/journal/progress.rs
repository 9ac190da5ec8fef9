//! Per-instrument cursors of a running job.
//!
//! A command's last state writes and its cursor advance happen under one lock,
//! and snapshots are built under the same lock, so a snapshot never shows a
//! command's effects without also showing that command as done.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::journal::records::Instrument;

/// Next ordinal to run for each instrument of one job.
#[derive(Debug, Default)]
pub struct JobProgress {
    cursors: Mutex<BTreeMap<Instrument, u32>>,
}

impl JobProgress {
    /// Progress starting from the given cursors.
    pub fn new(cursors: BTreeMap<Instrument, u32>) -> Self {
        Self {
            cursors: Mutex::new(cursors),
        }
    }

    /// Next ordinal for `instrument` (1 when it has not started).
    pub fn cursor(&self, instrument: Instrument) -> u32 {
        self.cursors.lock().get(&instrument).copied().unwrap_or(1)
    }

    /// Move `instrument` to `cursor`.
    pub fn set(&self, instrument: Instrument, cursor: u32) {
        self.cursors.lock().insert(instrument, cursor);
    }

    /// Run the final step of command `ordinal` and, if it succeeds, mark the
    /// command done, with no snapshot able to fall in between.
    ///
    /// `step` must not call back into this `JobProgress`.
    pub fn complete<T, E>(
        &self,
        instrument: Instrument,
        ordinal: u32,
        step: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let mut cursors = self.cursors.lock();
        let value = step()?;
        cursors.insert(instrument, ordinal + 1);
        Ok(value)
    }

    /// Run `f` with no command completing meanwhile.
    pub fn atomically<T>(&self, f: impl FnOnce() -> T) -> T {
        let _cursors = self.cursors.lock();
        f()
    }

    /// Run `f` against a consistent view of the cursors.
    pub fn read<T>(&self, f: impl FnOnce(&BTreeMap<Instrument, u32>) -> T) -> T {
        let cursors = self.cursors.lock();
        f(&cursors)
    }
}
