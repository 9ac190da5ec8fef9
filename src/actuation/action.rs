//! The vocabulary of physical actions the interpreter asks a driver to perform.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::labware::{PlateType, SlotAddress};

/// One physical motion, with the operands the driver needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Pick `tool` up from the rack
    AttachTool {
        /// Tool identifier, e.g. `100`
        tool: String,
    },
    /// Return `tool` to the rack
    DetachTool {
        /// Tool identifier
        tool: String,
    },
    /// Run the wash cycle for `tool`
    WashTool {
        /// Tool identifier
        tool: String,
    },
    /// Dip `tool` into the staged source plate, then the staged destination plate
    TransferPins {
        /// Tool identifier
        tool: String,
    },
    /// Lift `tool` clear of both stages
    ToolMoveSafe {
        /// Tool identifier
        tool: String,
    },
    /// Turn the carousel so `stacker` faces the transport arm
    RotateCarousel {
        /// 1-based stacker index
        stacker: usize,
    },
    /// Take a plate off a stacker shelf into the gripper
    GetFromStack {
        /// Plate being moved
        plate_id: String,
        /// Kind of the plate, for drivers that grip them differently
        plate_type: PlateType,
        /// Shelf the plate leaves
        slot: SlotAddress,
    },
    /// Put the gripped plate back on a stacker shelf
    SetToStack {
        /// Plate being moved
        plate_id: String,
        /// Kind of the plate
        plate_type: PlateType,
        /// Shelf the plate lands on
        slot: SlotAddress,
    },
    /// Take a plate off its stage into the gripper
    GetFromStage {
        /// Plate being moved
        plate_id: String,
        /// Stage the plate leaves
        plate_type: PlateType,
    },
    /// Put the gripped plate on its stage
    SetToStage {
        /// Plate being moved
        plate_id: String,
        /// Stage the plate lands on
        plate_type: PlateType,
    },
    /// Move the arm clear of the stages
    ArmMoveSafe,
    /// Send the arm to its home position
    ArmMoveHome,
}

impl Action {
    /// Short verb used as a log field and a driver dispatch key.
    pub fn verb(&self) -> &'static str {
        match self {
            Action::AttachTool { .. } => "attach",
            Action::DetachTool { .. } => "detach",
            Action::WashTool { .. } => "wash",
            Action::TransferPins { .. } => "transfer",
            Action::ToolMoveSafe { .. } => "tool_move_safe",
            Action::RotateCarousel { .. } => "rotate",
            Action::GetFromStack { .. } => "get_from_stack",
            Action::SetToStack { .. } => "set_to_stack",
            Action::GetFromStage { .. } => "get_from_stage",
            Action::SetToStage { .. } => "set_to_stage",
            Action::ArmMoveSafe => "arm_move_safe",
            Action::ArmMoveHome => "arm_move_home",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::AttachTool { tool } => write!(f, "attach tool {tool}"),
            Action::DetachTool { tool } => write!(f, "detach tool {tool}"),
            Action::WashTool { tool } => write!(f, "wash tool {tool}"),
            Action::TransferPins { tool } => write!(f, "transfer with tool {tool}"),
            Action::ToolMoveSafe { tool } => write!(f, "move tool {tool} to safe"),
            Action::RotateCarousel { stacker } => write!(f, "rotate carousel to {stacker}"),
            Action::GetFromStack {
                plate_id,
                plate_type,
                slot,
            } => write!(f, "get {plate_type} {plate_id} from stack {slot}"),
            Action::SetToStack {
                plate_id,
                plate_type,
                slot,
            } => write!(f, "set {plate_type} {plate_id} to stack {slot}"),
            Action::GetFromStage {
                plate_id,
                plate_type,
            } => write!(f, "get {plate_type} {plate_id} from stage"),
            Action::SetToStage {
                plate_id,
                plate_type,
            } => write!(f, "set {plate_type} {plate_id} to stage"),
            Action::ArmMoveSafe => f.write_str("move arm to safe"),
            Action::ArmMoveHome => f.write_str("move arm home"),
        }
    }
}
