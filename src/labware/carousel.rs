//! The plate carousel.
//!
//! A fixed ring of stackers with one rotational position. Only the stacker at
//! the current position faces the transport arm, so picking and placing check
//! reachability. Plates that have left the ring (in the gripper or on the
//! stage) are tracked here as well, which keeps every plate's location unique
//! across the workcell.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CarouselConfig;
use crate::error::{AppResult, TransferError};
use crate::labware::plate::{Plate, PlateLocation, PlateType, SlotAddress};
use crate::labware::stacker::{build_stacker, Stacker};

/// Carousel shared between runners. Never held across an `.await`.
pub type SharedCarousel = Arc<Mutex<Carousel>>;

/// Serializable picture of every plate and the rotational position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlateLayout {
    /// Stacker facing the arm, 1-based (0 when never set)
    pub current_position: usize,
    /// Every tracked plate with its location
    pub plates: Vec<Plate>,
}

impl PlateLayout {
    /// The plate with `plate_id`, if listed.
    pub fn plate(&self, plate_id: &str) -> Option<&Plate> {
        self.plates.iter().find(|p| p.id == plate_id)
    }
}

/// Ring of stackers plus the plates that are currently off the ring.
#[derive(Debug)]
pub struct Carousel {
    stackers: Vec<Box<dyn Stacker>>,
    current_position: usize,
    off_ring: BTreeMap<String, Plate>,
}

impl Carousel {
    /// Empty carousel at the configured initial position.
    pub fn new(config: &CarouselConfig) -> Self {
        Self {
            stackers: config.stackers.iter().map(build_stacker).collect(),
            current_position: config.initial_position,
            off_ring: BTreeMap::new(),
        }
    }

    /// Rebuild stacker contents from a layout.
    ///
    /// Plates are loaded bottom-up per stacker so sequential stackers accept them.
    pub fn from_layout(config: &CarouselConfig, layout: &PlateLayout) -> AppResult<Self> {
        let mut carousel = Self::new(config);
        if layout.current_position != 0 {
            carousel.rotate_to(layout.current_position)?;
        }

        let mut plates: Vec<&Plate> = layout.plates.iter().collect();
        plates.sort_by_key(|p| p.location.slot());
        for plate in plates {
            carousel.load(plate.clone())?;
        }
        Ok(carousel)
    }

    /// Wrap for sharing between runners.
    pub fn shared(self) -> SharedCarousel {
        Arc::new(Mutex::new(self))
    }

    /// Number of stackers in the ring.
    pub fn len(&self) -> usize {
        self.stackers.len()
    }

    /// True for a ring without stackers.
    pub fn is_empty(&self) -> bool {
        self.stackers.is_empty()
    }

    /// Stacker facing the arm, 1-based.
    pub fn current_position(&self) -> usize {
        self.current_position
    }

    /// Record a completed rotation. The only mutator of the rotational position.
    pub fn rotate_to(&mut self, stacker_index: usize) -> AppResult<()> {
        self.check_index(stacker_index)?;
        debug!(from = self.current_position, to = stacker_index, "carousel rotated");
        self.current_position = stacker_index;
        Ok(())
    }

    /// Stacker at a 1-based index.
    pub fn stacker(&self, stacker_index: usize) -> AppResult<&dyn Stacker> {
        self.check_index(stacker_index)?;
        Ok(self.stackers[stacker_index - 1].as_ref())
    }

    /// Find the shelf holding `plate_id`.
    pub fn locate(&self, plate_id: &str) -> AppResult<SlotAddress> {
        self.stackers
            .iter()
            .enumerate()
            .find_map(|(i, s)| s.position_of(plate_id).map(|p| SlotAddress::new(i + 1, p)))
            .ok_or_else(|| {
                TransferError::not_found(format!("plate '{plate_id}' is not in any stacker"))
            })
    }

    /// Any plate in the workcell, on or off the ring.
    pub fn plate(&self, plate_id: &str) -> Option<&Plate> {
        self.off_ring.get(plate_id).or_else(|| {
            self.stackers
                .iter()
                .find_map(|s| s.plates().into_iter().find(|(_, p)| p.id == plate_id))
                .map(|(_, p)| p)
        })
    }

    /// Mutable access for status and volume bookkeeping.
    pub fn plate_mut(&mut self, plate_id: &str) -> Option<&mut Plate> {
        if self.off_ring.contains_key(plate_id) {
            return self.off_ring.get_mut(plate_id);
        }
        self.stackers
            .iter_mut()
            .find_map(|s| s.plate_mut(plate_id))
    }

    /// Place a plate wherever its location says, without reachability checks.
    pub fn load(&mut self, plate: Plate) -> AppResult<()> {
        if self.plate(&plate.id).is_some() {
            return Err(TransferError::invalid(format!(
                "plate '{}' is already tracked",
                plate.id
            )));
        }
        match plate.location {
            PlateLocation::Stacker(slot) => {
                self.check_index(slot.stack)?;
                let position = self.stackers[slot.stack - 1].add(plate, Some(slot.position))?;
                debug_assert_eq!(position, slot.position);
            }
            PlateLocation::Gripper | PlateLocation::Stage => {
                self.off_ring.insert(plate.id.clone(), plate);
            }
        }
        Ok(())
    }

    /// Take a plate off the reachable stacker into the gripper.
    pub fn pick(&mut self, plate_id: &str) -> AppResult<SlotAddress> {
        let slot = self.locate(plate_id)?;
        self.check_reachable(slot.stack)?;
        let mut plate = self.stackers[slot.stack - 1].remove(plate_id)?;
        plate.location = PlateLocation::Gripper;
        plate.origin = Some(slot);
        self.off_ring.insert(plate.id.clone(), plate);
        Ok(slot)
    }

    /// Put the gripped plate onto a shelf of the reachable stacker.
    pub fn place(&mut self, plate_id: &str, slot: SlotAddress) -> AppResult<()> {
        self.check_reachable(slot.stack)?;
        let mut plate = self.off_ring.remove(plate_id).ok_or_else(|| {
            TransferError::invalid(format!("plate '{plate_id}' is not held by the gripper"))
        })?;
        if plate.location != PlateLocation::Gripper {
            let err = TransferError::invalid(format!("plate '{plate_id}' is not in the gripper"));
            self.off_ring.insert(plate.id.clone(), plate);
            return Err(err);
        }

        plate.location = PlateLocation::Stacker(slot);
        if let Err(err) = self.stackers[slot.stack - 1].add(plate.clone(), Some(slot.position)) {
            plate.location = PlateLocation::Gripper;
            self.off_ring.insert(plate.id.clone(), plate);
            return Err(err);
        }
        Ok(())
    }

    /// Move an off-ring plate between the gripper and the stage.
    pub fn relocate(&mut self, plate_id: &str, location: PlateLocation) -> AppResult<()> {
        if location.slot().is_some() {
            return Err(TransferError::invalid(
                "use place() to put a plate into a stacker",
            ));
        }
        let plate = self.off_ring.get_mut(plate_id).ok_or_else(|| {
            TransferError::invalid(format!(
                "plate '{plate_id}' is not in the gripper or on the stage"
            ))
        })?;
        plate.location = location;
        Ok(())
    }

    /// The plate of a given type sitting on the stage, if any.
    pub fn staged(&self, plate_type: PlateType) -> Option<&Plate> {
        self.off_ring
            .values()
            .find(|p| p.location == PlateLocation::Stage && p.plate_type() == plate_type)
    }

    /// Slot a gripped plate returns to: its target, else where it came from.
    pub fn return_slot(&self, plate_id: &str) -> AppResult<SlotAddress> {
        let plate = self
            .plate(plate_id)
            .ok_or_else(|| TransferError::not_found(format!("plate '{plate_id}' is unknown")))?;
        plate.return_slot().ok_or_else(|| {
            TransferError::invalid(format!("plate '{plate_id}' has no return location"))
        })
    }

    /// Every plate with its current location, ring plates first in slot order.
    pub fn layout(&self) -> PlateLayout {
        let mut plates: Vec<Plate> = self
            .stackers
            .iter()
            .flat_map(|s| s.plates().into_iter().map(|(_, p)| p.clone()))
            .collect();
        plates.extend(self.off_ring.values().cloned());
        PlateLayout {
            current_position: self.current_position,
            plates,
        }
    }

    fn check_index(&self, stacker_index: usize) -> AppResult<()> {
        if stacker_index == 0 || stacker_index > self.stackers.len() {
            return Err(TransferError::invalid(format!(
                "carousel index {} out of range 1-{}",
                stacker_index,
                self.stackers.len()
            )));
        }
        Ok(())
    }

    fn check_reachable(&self, stacker_index: usize) -> AppResult<()> {
        self.check_index(stacker_index)?;
        if stacker_index != self.current_position {
            return Err(TransferError::invalid(format!(
                "stacker {} is not reachable, carousel is at {}",
                stacker_index, self.current_position
            )));
        }
        Ok(())
    }
}
