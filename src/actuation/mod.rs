//! Actuation boundary.
//!
//! The interpreter never talks to hardware directly. It hands an [`Action`] to
//! an [`Actuator`] and waits for the result; postconditions are only applied
//! once the actuator reports success.

pub mod action;
pub mod simulated;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::AppResult;

pub use action::Action;
pub use simulated::SimulatedActuator;

/// Performs physical motions on behalf of the command runners.
///
/// Implementations should return promptly with `TransferError::Cancelled` once
/// `cancel` fires. Retry policy, if any, belongs to the implementation.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Perform `action`, returning once the motion has finished.
    async fn actuate(&self, action: &Action, cancel: &CancellationToken) -> AppResult<()>;
}
