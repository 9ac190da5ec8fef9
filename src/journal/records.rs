//! Journal, command and run-snapshot records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, TransferError};
use crate::labware::{Plate, PlateLayout};
use crate::state::NamedState;

/// A device driven by its own command runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instrument {
    /// Pin-tool arm: attach, wash, transfer, detach
    LiquidHandler,
    /// Plate-moving arm serving the carousel and the stage
    PlateTransport,
}

impl Instrument {
    /// Every instrument, in runner start order.
    pub const ALL: [Instrument; 2] = [Instrument::LiquidHandler, Instrument::PlateTransport];

    /// Snake-case name used in files and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Instrument::LiquidHandler => "liquid_handler",
            Instrument::PlateTransport => "plate_transport",
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Instrument {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "liquid_handler" => Ok(Instrument::LiquidHandler),
            "plate_transport" => Ok(Instrument::PlateTransport),
            other => Err(TransferError::invalid(format!("unknown instrument '{other}'"))),
        }
    }
}

/// One line of a journal, addressed by `(journal, instrument, ordinal)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Journal the line belongs to
    pub journal_id: String,
    /// Runner that executes it
    pub instrument: Instrument,
    /// 1-based, gapless per instrument
    pub ordinal: u32,
    /// Raw command text, parsed when executed
    pub text: String,
}

/// A planned job: an ordered command list per instrument plus the plates it uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    /// Unique, file-name safe identifier
    pub id: String,
    /// Free text for operators
    #[serde(default)]
    pub description: String,
    /// Command lines per instrument, ordinal 1 first
    #[serde(default)]
    pub commands: BTreeMap<Instrument, Vec<String>>,
    /// Plates at their starting locations
    #[serde(default)]
    pub plates: Vec<Plate>,
}

impl Journal {
    /// Empty journal named `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            commands: BTreeMap::new(),
            plates: Vec::new(),
        }
    }

    /// Replace `instrument`'s command list.
    pub fn with_commands<I, S>(mut self, instrument: Instrument, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands
            .insert(instrument, commands.into_iter().map(Into::into).collect());
        self
    }

    /// Add a plate at its starting location.
    pub fn with_plate(mut self, plate: Plate) -> Self {
        self.plates.push(plate);
        self
    }

    /// Command at `ordinal`, or `None` past the end of the instrument's list.
    pub fn command(&self, instrument: Instrument, ordinal: u32) -> Option<Command> {
        let index = usize::try_from(ordinal).ok()?.checked_sub(1)?;
        self.commands
            .get(&instrument)
            .and_then(|list| list.get(index))
            .map(|text| Command {
                journal_id: self.id.clone(),
                instrument,
                ordinal,
                text: text.clone(),
            })
    }

    /// Number of commands planned for an instrument.
    pub fn len(&self, instrument: Instrument) -> usize {
        self.commands.get(&instrument).map_or(0, Vec::len)
    }

    /// Layout the job starts from.
    pub fn initial_layout(&self, current_position: usize) -> PlateLayout {
        PlateLayout {
            current_position,
            plates: self.plates.clone(),
        }
    }

    /// Identifiers end up in file names, so keep them to a safe alphabet.
    pub fn validate(&self) -> AppResult<()> {
        validate_id(&self.id)?;
        let mut seen = std::collections::HashSet::new();
        for plate in &self.plates {
            if !seen.insert(plate.id.as_str()) {
                return Err(TransferError::invalid(format!(
                    "journal '{}' lists plate '{}' twice",
                    self.id, plate.id
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_id(id: &str) -> AppResult<()> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !id.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(TransferError::invalid(format!("invalid journal id '{id}'")))
    }
}

/// Resumption record for one journal, overwritten after every command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Journal this run executes
    pub journal_id: String,
    /// Next ordinal to run, per instrument
    pub cursors: BTreeMap<Instrument, u32>,
    /// Every named state written so far
    pub named_state: NamedState,
    /// Plates as the job found them
    pub initial_layout: PlateLayout,
    /// Plates as of the last completed command
    pub current_layout: PlateLayout,
    /// Set once every runner reached the end of its list
    pub completed: bool,
    /// Time of the last write
    pub updated_at: DateTime<Utc>,
}

impl RunSnapshot {
    /// A snapshot for a job that has not run yet.
    pub fn fresh(journal_id: impl Into<String>) -> Self {
        Self {
            journal_id: journal_id.into(),
            cursors: Instrument::ALL.iter().map(|i| (*i, 1)).collect(),
            named_state: NamedState::new(),
            initial_layout: PlateLayout::default(),
            current_layout: PlateLayout::default(),
            completed: false,
            updated_at: Utc::now(),
        }
    }

    /// Persisted cursor, 1 for an instrument that never ran.
    pub fn cursor(&self, instrument: Instrument) -> u32 {
        self.cursors.get(&instrument).copied().unwrap_or(1)
    }
}
