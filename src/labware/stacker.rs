//! Plate stackers.
//!
//! A stacker is a bounded column of shelves. Two behaviours exist, chosen when
//! the carousel is built:
//!
//! - [`HotelStacker`]: random access, any shelf can be filled or emptied.
//! - [`SequentialStacker`]: strict LIFO, only the most recently added plate can
//!   be removed, and every plate in it is of one kind.
//!
//! Violations are hard errors; the stacker is left unchanged when an operation fails.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::StackerConfig;
use crate::error::{AppResult, TransferError};
use crate::labware::plate::{Plate, PlateType};

/// Stacker behaviour selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackerKind {
    /// Any shelf, any order
    Hotel,
    /// Last in, first out, one plate kind
    Sequential,
}

/// Capacity-bound plate container.
pub trait Stacker: Send + Sync + fmt::Debug {
    /// Behaviour of this stacker.
    fn kind(&self) -> StackerKind;

    /// Number of shelves.
    fn capacity(&self) -> usize;

    /// Number of plates held.
    fn len(&self) -> usize;

    /// True when no plate is held.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when every shelf is taken.
    fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Store a plate, at `position` (1-based) when given. Returns the position used.
    fn add(&mut self, plate: Plate, position: Option<usize>) -> AppResult<usize>;

    /// Take a plate out of the stacker.
    fn remove(&mut self, plate_id: &str) -> AppResult<Plate>;

    /// Shelf holding `plate_id`, if it is in this stacker.
    fn position_of(&self, plate_id: &str) -> Option<usize>;

    /// Occupied shelves in ascending position order.
    fn plates(&self) -> Vec<(usize, &Plate)>;

    /// Mutable access to a stored plate.
    fn plate_mut(&mut self, plate_id: &str) -> Option<&mut Plate>;
}

/// Build the stacker described by `config`.
pub fn build_stacker(config: &StackerConfig) -> Box<dyn Stacker> {
    match config.kind {
        StackerKind::Hotel => Box::new(HotelStacker::new(config.capacity)),
        StackerKind::Sequential => {
            Box::new(SequentialStacker::new(config.capacity, config.plate_type))
        }
    }
}

// =============================================================================
// HotelStacker
// =============================================================================

/// Random-access stacker: every shelf is independently addressable.
#[derive(Debug)]
pub struct HotelStacker {
    shelves: Vec<Option<Plate>>,
}

impl HotelStacker {
    /// Empty hotel with `capacity` shelves.
    pub fn new(capacity: usize) -> Self {
        Self {
            shelves: (0..capacity).map(|_| None).collect(),
        }
    }
}

impl Stacker for HotelStacker {
    fn kind(&self) -> StackerKind {
        StackerKind::Hotel
    }

    fn capacity(&self) -> usize {
        self.shelves.len()
    }

    fn len(&self) -> usize {
        self.shelves.iter().filter(|s| s.is_some()).count()
    }

    fn add(&mut self, plate: Plate, position: Option<usize>) -> AppResult<usize> {
        if self.position_of(&plate.id).is_some() {
            return Err(TransferError::invalid(format!(
                "plate '{}' is already in this stacker",
                plate.id
            )));
        }
        if self.is_full() {
            return Err(TransferError::invalid(format!(
                "hotel is full ({} plates), cannot add '{}'",
                self.capacity(),
                plate.id
            )));
        }

        let index = match position {
            Some(p) => {
                if p == 0 || p > self.capacity() {
                    return Err(TransferError::invalid(format!(
                        "hotel position {} out of range 1-{}",
                        p,
                        self.capacity()
                    )));
                }
                if self.shelves[p - 1].is_some() {
                    return Err(TransferError::invalid(format!(
                        "hotel position {p} is occupied"
                    )));
                }
                p - 1
            }
            None => self
                .shelves
                .iter()
                .position(Option::is_none)
                .ok_or_else(|| TransferError::invalid("hotel is full"))?,
        };

        self.shelves[index] = Some(plate);
        Ok(index + 1)
    }

    fn remove(&mut self, plate_id: &str) -> AppResult<Plate> {
        let position = self.position_of(plate_id).ok_or_else(|| {
            TransferError::invalid(format!("plate '{plate_id}' not in stacker"))
        })?;
        self.shelves[position - 1]
            .take()
            .ok_or_else(|| TransferError::invalid(format!("hotel position {position} is empty")))
    }

    fn position_of(&self, plate_id: &str) -> Option<usize> {
        self.shelves
            .iter()
            .position(|s| s.as_ref().is_some_and(|p| p.id == plate_id))
            .map(|i| i + 1)
    }

    fn plates(&self) -> Vec<(usize, &Plate)> {
        self.shelves
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|p| (i + 1, p)))
            .collect()
    }

    fn plate_mut(&mut self, plate_id: &str) -> Option<&mut Plate> {
        self.shelves
            .iter_mut()
            .flatten()
            .find(|p| p.id == plate_id)
    }
}

// =============================================================================
// SequentialStacker
// =============================================================================

/// LIFO stacker holding a single plate kind. Position 1 is the bottom plate.
#[derive(Debug)]
pub struct SequentialStacker {
    capacity: usize,
    plate_type: Option<PlateType>,
    stack: Vec<Plate>,
}

impl SequentialStacker {
    /// `plate_type` fixes the accepted kind; when `None` the first plate added fixes it.
    pub fn new(capacity: usize, plate_type: Option<PlateType>) -> Self {
        Self {
            capacity,
            plate_type,
            stack: Vec::with_capacity(capacity),
        }
    }

    /// Kind this stacker accepts, once known.
    pub fn plate_type(&self) -> Option<PlateType> {
        self.plate_type
            .or_else(|| self.stack.first().map(Plate::plate_type))
    }

    /// The plate that would be removed next.
    pub fn top(&self) -> Option<&Plate> {
        self.stack.last()
    }
}

impl Stacker for SequentialStacker {
    fn kind(&self) -> StackerKind {
        StackerKind::Sequential
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.stack.len()
    }

    fn add(&mut self, plate: Plate, position: Option<usize>) -> AppResult<usize> {
        if self.position_of(&plate.id).is_some() {
            return Err(TransferError::invalid(format!(
                "plate '{}' is already in this stacker",
                plate.id
            )));
        }
        if self.is_full() {
            return Err(TransferError::invalid(format!(
                "sequential stacker is full ({} plates), cannot add '{}'",
                self.capacity, plate.id
            )));
        }
        if let Some(accepted) = self.plate_type() {
            if plate.plate_type() != accepted {
                return Err(TransferError::invalid(format!(
                    "sequential stacker holds {} plates, cannot add {} plate '{}'",
                    accepted,
                    plate.plate_type(),
                    plate.id
                )));
            }
        }
        let next = self.stack.len() + 1;
        if let Some(p) = position {
            if p != next {
                return Err(TransferError::invalid(format!(
                    "sequential stacker only accepts position {next}, got {p}"
                )));
            }
        }

        self.stack.push(plate);
        Ok(next)
    }

    fn remove(&mut self, plate_id: &str) -> AppResult<Plate> {
        match self.stack.last() {
            None => Err(TransferError::invalid(format!(
                "sequential stacker is empty, cannot remove '{plate_id}'"
            ))),
            Some(top) if top.id != plate_id => Err(TransferError::invalid(format!(
                "only the top plate '{}' can be removed, not '{}'",
                top.id, plate_id
            ))),
            Some(_) => self
                .stack
                .pop()
                .ok_or_else(|| TransferError::invalid("sequential stacker is empty")),
        }
    }

    fn position_of(&self, plate_id: &str) -> Option<usize> {
        self.stack
            .iter()
            .position(|p| p.id == plate_id)
            .map(|i| i + 1)
    }

    fn plates(&self) -> Vec<(usize, &Plate)> {
        self.stack.iter().enumerate().map(|(i, p)| (i + 1, p)).collect()
    }

    fn plate_mut(&mut self, plate_id: &str) -> Option<&mut Plate> {
        self.stack.iter_mut().find(|p| p.id == plate_id)
    }
}
