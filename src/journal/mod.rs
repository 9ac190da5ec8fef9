//! Journals, run snapshots and the run log that stores them.

pub mod file;
pub mod memory;
pub mod progress;
pub mod records;
pub mod run_log;

pub use file::FileRunLog;
pub use memory::MemoryRunLog;
pub use progress::JobProgress;
pub use records::{Command, Instrument, Journal, RunSnapshot};
pub use run_log::{CommandSource, RunLog, SnapshotStore};
