//! Simulated actuator
//!
//! Stands in for the vendor drivers. Every action sleeps for its configured
//! duration (`tokio::time::sleep`, never a blocking sleep) and can be cut short
//! by cancellation. Performed actions are kept in order so callers can inspect
//! what would have moved.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::actuation::{Action, Actuator};
use crate::config::SimulatedDelays;
use crate::error::{AppResult, TransferError};

/// Actuator that sleeps through each motion instead of moving anything.
pub struct SimulatedActuator {
    delays: SimulatedDelays,
    history: Mutex<Vec<Action>>,
}

impl SimulatedActuator {
    /// Actuator taking `delays` for each kind of motion.
    pub fn new(delays: SimulatedDelays) -> Self {
        Self {
            delays,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Actuator that completes every action immediately.
    pub fn instant() -> Self {
        Self::new(SimulatedDelays::instant())
    }

    /// Completed actions, oldest first.
    pub fn history(&self) -> Vec<Action> {
        self.history.lock().clone()
    }

    fn delay_for(&self, action: &Action) -> Duration {
        let ms = match action {
            Action::AttachTool { .. } => self.delays.attach_ms,
            Action::DetachTool { .. } => self.delays.detach_ms,
            Action::WashTool { .. } => self.delays.wash_ms,
            Action::TransferPins { .. } => self.delays.transfer_ms,
            Action::ToolMoveSafe { .. } | Action::ArmMoveSafe | Action::ArmMoveHome => {
                self.delays.move_safe_ms
            }
            Action::RotateCarousel { .. } => self.delays.rotate_ms,
            Action::GetFromStack { .. }
            | Action::SetToStack { .. }
            | Action::GetFromStage { .. }
            | Action::SetToStage { .. } => self.delays.plate_move_ms,
        };
        Duration::from_millis(ms)
    }
}

impl Default for SimulatedActuator {
    fn default() -> Self {
        Self::new(SimulatedDelays::default())
    }
}

#[async_trait]
impl Actuator for SimulatedActuator {
    async fn actuate(&self, action: &Action, cancel: &CancellationToken) -> AppResult<()> {
        let delay = self.delay_for(action);
        debug!(%action, delay_ms = delay.as_millis() as u64, "simulating");
        // zero-length motions complete without yielding
        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = sleep(delay) => {}
            }
        }
        self.history.lock().push(action.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_actions_in_order() {
        let actuator = SimulatedActuator::instant();
        let cancel = CancellationToken::new();
        actuator
            .actuate(&Action::ArmMoveHome, &cancel)
            .await
            .unwrap();
        actuator
            .actuate(&Action::RotateCarousel { stacker: 2 }, &cancel)
            .await
            .unwrap();
        assert_eq!(
            actuator.history(),
            vec![Action::ArmMoveHome, Action::RotateCarousel { stacker: 2 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_motion() {
        let actuator = SimulatedActuator::default();
        let cancel = CancellationToken::new();
        let action = Action::WashTool { tool: "100".into() };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let err = actuator.actuate(&action, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(actuator.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_uses_configured_delay() {
        let actuator = SimulatedActuator::default();
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();
        actuator
            .actuate(&Action::WashTool { tool: "33".into() }, &cancel)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(2000));
    }
}
