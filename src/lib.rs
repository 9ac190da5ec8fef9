//! Core library for the pin-transfer workcell.
//!
//! Two command runners, one for the liquid handler and one for the plate
//! transport arm, execute their journals concurrently against one shared
//! named-state store and one carousel model. Runners coordinate only through
//! named states: a command waits for its preconditions, drives a single
//! actuation, then writes its postconditions, which in turn release whatever
//! the other runner is waiting on. Every command completion persists a run
//! snapshot so an interrupted job resumes where it stopped.
//!
//! # Modules
//!
//! - [`state`]: named states and the wait/signal registry
//! - [`labware`]: plates, stackers and the carousel
//! - [`interpreter`]: command parsing and the precondition/postcondition tables
//! - [`runner`]: per-instrument runners and the job controller
//! - [`journal`]: journals, run snapshots and run log storage
//! - [`actuation`]: the actuation boundary and a simulated driver
//! - [`config`]: figment-based settings

pub mod actuation;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod journal;
pub mod labware;
pub mod runner;
pub mod state;
pub mod telemetry;

pub use error::{AppResult, TransferError};
