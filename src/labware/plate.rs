//! Plate records.
//!
//! A plate is one record with a discriminant: source plates carry the
//! volume/replicate pair they are pinned with, destination plates accumulate
//! the volume received from each contributing source plate. The variant tag is
//! written first in the serialized form (`"kind": "source"`) and decoding
//! dispatches on it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// The two plate roles in a pin transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateType {
    /// Plate the pins are dipped into first
    Source,
    /// Plate receiving the pinned volume
    Destination,
}

impl PlateType {
    /// Both roles, source first.
    pub const ALL: [PlateType; 2] = [PlateType::Source, PlateType::Destination];

    /// Lower-case name as written in commands.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlateType::Source => "source",
            PlateType::Destination => "destination",
        }
    }
}

impl fmt::Display for PlateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlateType {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "source" => Ok(PlateType::Source),
            "destination" | "dest" => Ok(PlateType::Destination),
            other => Err(TransferError::invalid(format!(
                "plate type must be source or destination, got '{other}'"
            ))),
        }
    }
}

/// A shelf in the carousel: stacker index (1-based) and position in that stacker (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotAddress {
    /// Stacker index
    pub stack: usize,
    /// Shelf within the stacker
    pub position: usize,
}

impl SlotAddress {
    /// Shelf `position` of stacker `stack`.
    pub fn new(stack: usize, position: usize) -> Self {
        Self { stack, position }
    }
}

impl fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.stack, self.position)
    }
}

/// Where a plate physically is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum PlateLocation {
    /// On a stacker shelf
    Stacker(SlotAddress),
    /// Held by the transport arm's gripper
    Gripper,
    /// Sitting on the shared stage
    Stage,
}

impl PlateLocation {
    /// The shelf, for a plate in a stacker.
    pub fn slot(&self) -> Option<SlotAddress> {
        match self {
            PlateLocation::Stacker(slot) => Some(*slot),
            _ => None,
        }
    }
}

/// Variant payload of a plate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlateKind {
    /// Compound plate
    Source {
        /// Transfer volume in nL
        volume: u32,
        /// Number of destination replicates pinned from this plate
        replicates: u32,
    },
    /// Assay plate
    Destination {
        /// Accumulated volume per contributing source plate id
        #[serde(default)]
        sources: BTreeMap<String, f64>,
    },
}

/// A microplate tracked by the workcell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plate {
    /// Barcode or other unique id
    pub id: String,
    /// Role and its payload
    #[serde(flatten)]
    pub kind: PlateKind,
    /// Current location
    pub location: PlateLocation,
    /// Slot the plate should be returned to, if different from where it came from
    #[serde(default)]
    pub target: Option<SlotAddress>,
    /// Slot the plate was last taken from
    #[serde(default)]
    pub origin: Option<SlotAddress>,
    /// Named flags, e.g. `transferred`
    #[serde(default)]
    pub status: BTreeMap<String, bool>,
}

impl Plate {
    /// A source plate stored at `slot`.
    pub fn source(id: impl Into<String>, volume: u32, replicates: u32, slot: SlotAddress) -> Self {
        Self::new(id, PlateKind::Source { volume, replicates }, slot)
    }

    /// An empty destination plate stored at `slot`.
    pub fn destination(id: impl Into<String>, slot: SlotAddress) -> Self {
        Self::new(
            id,
            PlateKind::Destination {
                sources: BTreeMap::new(),
            },
            slot,
        )
    }

    fn new(id: impl Into<String>, kind: PlateKind, slot: SlotAddress) -> Self {
        Self {
            id: id.into(),
            kind,
            location: PlateLocation::Stacker(slot),
            target: None,
            origin: None,
            status: BTreeMap::new(),
        }
    }

    /// Return the plate to `target` instead of its original shelf.
    pub fn with_target(mut self, target: SlotAddress) -> Self {
        self.target = Some(target);
        self
    }

    /// Role of the plate.
    pub fn plate_type(&self) -> PlateType {
        match self.kind {
            PlateKind::Source { .. } => PlateType::Source,
            PlateKind::Destination { .. } => PlateType::Destination,
        }
    }

    /// Status flag; absent flags read as `false`.
    pub fn flag(&self, name: &str) -> bool {
        self.status.get(name).copied().unwrap_or(false)
    }

    /// Set a status flag.
    pub fn set_flag(&mut self, name: impl Into<String>, value: bool) {
        self.status.insert(name.into(), value);
    }

    /// Record volume received from a source plate. Only meaningful for destinations.
    pub fn add_contribution(&mut self, source_id: &str, volume: f64) -> Result<(), TransferError> {
        match &mut self.kind {
            PlateKind::Destination { sources } => {
                *sources.entry(source_id.to_string()).or_insert(0.0) += volume;
                Ok(())
            }
            PlateKind::Source { .. } => Err(TransferError::invalid(format!(
                "plate '{}' is a source plate and cannot receive volume",
                self.id
            ))),
        }
    }

    /// Where a `Set ... to stack` returns this plate.
    pub fn return_slot(&self) -> Option<SlotAddress> {
        self.target.or(self.origin)
    }
}
