//! Plate-transport table.
//!
//! Stack operations resolve the shelf through the carousel and rotate it
//! first when the target stacker is not facing the arm. The carousel is only
//! locked for bookkeeping, never across an actuation.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::actuation::Action;
use crate::error::{AppResult, TransferError};
use crate::interpreter::command::{Site, TransportCommand};
use crate::interpreter::plan::{Condition, Plan};
use crate::interpreter::Interpreter;
use crate::journal::Command;
use crate::labware::{PlateLocation, PlateType};
use crate::state::{keys, Scope};

/// Status flag a destination plate gains once it leaves the stage.
pub(crate) const PLATE_TRANSFERRED: &str = "transferred";

fn arm(key: &'static str, value: bool) -> Condition {
    Condition::new(Scope::Arm, key, value)
}

fn stage(plate_type: PlateType, key: &'static str, value: bool) -> Condition {
    Condition::new(Scope::Stage(plate_type), key, value)
}

fn carousel_safe(value: bool) -> Condition {
    Condition::new(Scope::Carousel, keys::SAFE, value)
}

impl Interpreter {
    pub(crate) async fn execute_transport(
        &self,
        origin: &Command,
        cmd: &TransportCommand,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        match cmd {
            TransportCommand::Get {
                plate_type,
                plate_id,
                from: Site::Stack,
            } => self.get_from_stack(origin, *plate_type, plate_id, cancel).await,
            TransportCommand::Set {
                plate_type,
                plate_id,
                to: Site::Stack,
            } => self.set_to_stack(origin, *plate_type, plate_id, cancel).await,
            TransportCommand::Get {
                plate_type,
                plate_id,
                from: Site::Stage,
            } => self.get_from_stage(origin, *plate_type, plate_id, cancel).await,
            TransportCommand::Set {
                plate_type,
                plate_id,
                to: Site::Stage,
            } => self.set_to_stage(origin, *plate_type, plate_id, cancel).await,
            TransportCommand::MoveSafe => {
                let plan = Plan::new(Action::ArmMoveSafe).effect([arm(keys::SAFE, true)]);
                self.run_plan(origin, &plan, cancel, || Ok(())).await
            }
            TransportCommand::MoveHome => {
                let plan = Plan::new(Action::ArmMoveHome)
                    .then([arm(keys::PLATE_GRIPPED, false)])
                    .effect([arm(keys::SAFE, true), arm(keys::HOMED, true)]);
                self.run_plan(origin, &plan, cancel, || Ok(())).await
            }
        }
    }

    async fn get_from_stack(
        &self,
        origin: &Command,
        plate_type: PlateType,
        plate_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        self.await_group(&[arm(keys::PLATE_GRIPPED, false)], cancel)
            .await?;
        self.check_plate(plate_type, plate_id, None)?;
        let slot = self.carousel.lock().locate(plate_id)?;
        self.bring_to_arm(slot.stack, cancel).await?;

        let plan = Plan::new(Action::GetFromStack {
            plate_id: plate_id.to_string(),
            plate_type,
            slot,
        })
        .then([carousel_safe(true)])
        .effect([arm(keys::PLATE_GRIPPED, true)]);
        self.run_plan(origin, &plan, cancel, || {
            self.carousel.lock().pick(plate_id).map(|_| ())
        })
        .await
    }

    async fn set_to_stack(
        &self,
        origin: &Command,
        plate_type: PlateType,
        plate_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        self.await_group(&[arm(keys::PLATE_GRIPPED, true)], cancel)
            .await?;
        self.check_plate(plate_type, plate_id, Some(PlateLocation::Gripper))?;
        let slot = self.carousel.lock().return_slot(plate_id)?;
        self.bring_to_arm(slot.stack, cancel).await?;

        let plan = Plan::new(Action::SetToStack {
            plate_id: plate_id.to_string(),
            plate_type,
            slot,
        })
        .then([carousel_safe(true)])
        .effect([arm(keys::PLATE_GRIPPED, false)]);
        self.run_plan(origin, &plan, cancel, || {
            self.carousel.lock().place(plate_id, slot)
        })
        .await
    }

    async fn set_to_stage(
        &self,
        origin: &Command,
        plate_type: PlateType,
        plate_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let plan = Plan::new(Action::SetToStage {
            plate_id: plate_id.to_string(),
            plate_type,
        })
        .then([
            arm(keys::PLATE_GRIPPED, true),
            stage(plate_type, keys::OCCUPIED, false),
            stage(plate_type, keys::TOOL_PRESENT, false),
        ])
        .claim([arm(keys::SAFE, false)])
        .effect([
            stage(plate_type, keys::OCCUPIED, true),
            stage(plate_type, keys::TRANSFERRED, false),
            arm(keys::PLATE_GRIPPED, false),
        ]);

        self.await_preconditions(&plan.preconditions, cancel).await?;
        self.check_plate(plate_type, plate_id, Some(PlateLocation::Gripper))?;
        self.commit(origin, &plan, cancel, || {
            self.carousel
                .lock()
                .relocate(plate_id, PlateLocation::Stage)
        })
        .await
    }

    async fn get_from_stage(
        &self,
        origin: &Command,
        plate_type: PlateType,
        plate_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let mut ready = vec![
            stage(plate_type, keys::OCCUPIED, true),
            stage(plate_type, keys::TOOL_PRESENT, false),
        ];
        if plate_type == PlateType::Destination {
            ready.push(stage(plate_type, keys::TRANSFERRED, true));
        }
        let plan = Plan::new(Action::GetFromStage {
            plate_id: plate_id.to_string(),
            plate_type,
        })
        .then(ready)
        .then([arm(keys::PLATE_GRIPPED, false)])
        .claim([arm(keys::SAFE, false)])
        .effect([
            stage(plate_type, keys::OCCUPIED, false),
            arm(keys::PLATE_GRIPPED, true),
        ]);

        self.await_preconditions(&plan.preconditions, cancel).await?;
        self.check_plate(plate_type, plate_id, Some(PlateLocation::Stage))?;
        self.commit(origin, &plan, cancel, || {
            let mut carousel = self.carousel.lock();
            carousel.relocate(plate_id, PlateLocation::Gripper)?;
            if plate_type == PlateType::Destination {
                if let Some(plate) = carousel.plate_mut(plate_id) {
                    plate.set_flag(PLATE_TRANSFERRED, true);
                }
            }
            Ok(())
        })
        .await
    }

    /// Rotate the carousel so `stacker` faces the arm, bracketing the motion
    /// with `carousel.safe=false` / `true`.
    async fn bring_to_arm(&self, stacker: usize, cancel: &CancellationToken) -> AppResult<()> {
        let current = {
            let carousel = self.carousel.lock();
            carousel.stacker(stacker)?;
            carousel.current_position()
        };
        if current == stacker {
            if !self.store.get(&Scope::Carousel, keys::SAFE) {
                // stationary and in position
                self.apply(&[carousel_safe(true)]);
            }
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        info!(from = current, to = stacker, "rotating carousel");
        self.apply(&[carousel_safe(false)]);
        self.actuate(&Action::RotateCarousel { stacker }, cancel)
            .await?;
        self.progress.atomically(|| {
            self.carousel.lock().rotate_to(stacker)?;
            self.apply(&[carousel_safe(true)]);
            Ok(())
        })
    }

    /// The plate must exist, be of the commanded kind and, when given, be at `location`.
    fn check_plate(
        &self,
        plate_type: PlateType,
        plate_id: &str,
        location: Option<PlateLocation>,
    ) -> AppResult<()> {
        let carousel = self.carousel.lock();
        let plate = carousel
            .plate(plate_id)
            .ok_or_else(|| TransferError::not_found(format!("plate '{plate_id}'")))?;
        if plate.plate_type() != plate_type {
            return Err(TransferError::invalid(format!(
                "plate '{plate_id}' is a {} plate, command names {plate_type}",
                plate.plate_type()
            )));
        }
        if let Some(expected) = location {
            if plate.location != expected {
                return Err(TransferError::invalid(format!(
                    "plate '{plate_id}' is at {:?}, expected {:?}",
                    plate.location, expected
                )));
            }
        }
        debug!(plate = plate_id, %plate_type, "plate checked");
        Ok(())
    }
}
