//! Command runners and the job controller that drives them.

pub mod command_runner;
pub mod controller;
pub mod recorder;

pub use command_runner::{CommandRunner, RunnerState};
pub use controller::{JobController, JobReport};
pub use recorder::SnapshotRecorder;
