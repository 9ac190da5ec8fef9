//! Command text parsing.
//!
//! Liquid-handler lines are a verb followed by a tool id (`Attach 100`,
//! `Move Safe 96`). Transport lines follow
//! `Get|Set <source|destination> <plate-id> from|to <stack|stage>` or are one of
//! `MoveSafe` / `MoveHome`. Verbs and keywords are case-insensitive and a
//! two-word `Move Safe` equals `MoveSafe`; plate ids keep their case.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AppResult, TransferError};
use crate::journal::Instrument;
use crate::labware::PlateType;

#[allow(clippy::expect_used)]
static TOOL_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("tool id pattern"));

/// Liquid-handler verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolVerb {
    /// Pick the tool up from the rack
    Attach,
    /// Put the tool back
    Detach,
    /// Wash the tool
    Wash,
    /// Pin from the staged source plate into the staged destination plate
    Transfer,
    /// Lift the tool clear of the stages
    MoveSafe,
}

/// A parsed liquid-handler line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// What to do
    pub verb: ToolVerb,
    /// Tool id, digits only
    pub tool: String,
}

/// Where a transport command picks up or drops off a plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    /// The plate's stacker shelf in the carousel
    Stack,
    /// The plate kind's stage under the liquid handler
    Stage,
}

/// A parsed plate-transport line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    /// Take a plate into the gripper
    Get {
        /// Kind named in the command; must match the tracked plate
        plate_type: PlateType,
        /// Plate to move
        plate_id: String,
        /// Where the plate is now
        from: Site,
    },
    /// Put the gripped plate down
    Set {
        /// Kind named in the command; must match the tracked plate
        plate_type: PlateType,
        /// Plate to move
        plate_id: String,
        /// Where the plate goes
        to: Site,
    },
    /// Move the arm clear of the stages
    MoveSafe,
    /// Send the arm home
    MoveHome,
}

/// One journal line, parsed for the instrument that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    /// Liquid-handler command
    Tool(ToolCommand),
    /// Plate-transport command
    Transport(TransportCommand),
}

/// Parse one journal line for the given instrument.
pub fn parse(instrument: Instrument, text: &str) -> AppResult<ParsedCommand> {
    let (verb, operands) = split_verb(text)?;
    match instrument {
        Instrument::LiquidHandler => parse_tool(&verb, &operands, text).map(ParsedCommand::Tool),
        Instrument::PlateTransport => {
            parse_transport(&verb, &operands, text).map(ParsedCommand::Transport)
        }
    }
}

/// Lower-cased verb plus the remaining tokens. `Move X` folds into `movex`.
fn split_verb(text: &str) -> AppResult<(String, Vec<&str>)> {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(TransferError::invalid("empty command"));
    }
    let mut verb = tokens.remove(0).to_ascii_lowercase();
    if verb == "move" && !tokens.is_empty() {
        let second = tokens.remove(0).to_ascii_lowercase();
        verb.push_str(&second);
    }
    Ok((verb, tokens))
}

fn parse_tool(verb: &str, operands: &[&str], text: &str) -> AppResult<ToolCommand> {
    let verb = match verb {
        "attach" => ToolVerb::Attach,
        "detach" => ToolVerb::Detach,
        "wash" => ToolVerb::Wash,
        "transfer" => ToolVerb::Transfer,
        "movesafe" => ToolVerb::MoveSafe,
        _ => return Err(unknown_verb(Instrument::LiquidHandler, text)),
    };
    let rest = operands.join(" ");
    let tool = TOOL_ID
        .find(&rest)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| TransferError::invalid(format!("no tool id in command '{text}'")))?;
    Ok(ToolCommand { verb, tool })
}

fn parse_transport(verb: &str, operands: &[&str], text: &str) -> AppResult<TransportCommand> {
    match verb {
        "movesafe" if operands.is_empty() => Ok(TransportCommand::MoveSafe),
        "movehome" if operands.is_empty() => Ok(TransportCommand::MoveHome),
        "get" | "set" => {
            let [plate_type, plate_id, preposition, site] = operands else {
                return Err(malformed(text));
            };
            let plate_type: PlateType = plate_type.parse()?;
            let expected = if verb == "get" { "from" } else { "to" };
            if !preposition.eq_ignore_ascii_case(expected) {
                return Err(malformed(text));
            }
            let site = match site.to_ascii_lowercase().as_str() {
                "stack" => Site::Stack,
                "stage" => Site::Stage,
                _ => return Err(malformed(text)),
            };
            let plate_id = (*plate_id).to_string();
            Ok(if verb == "get" {
                TransportCommand::Get {
                    plate_type,
                    plate_id,
                    from: site,
                }
            } else {
                TransportCommand::Set {
                    plate_type,
                    plate_id,
                    to: site,
                }
            })
        }
        "movesafe" | "movehome" => Err(malformed(text)),
        _ => Err(unknown_verb(Instrument::PlateTransport, text)),
    }
}

fn unknown_verb(instrument: Instrument, text: &str) -> TransferError {
    TransferError::invalid(format!("unrecognised {instrument} command '{text}'"))
}

fn malformed(text: &str) -> TransferError {
    TransferError::invalid(format!(
        "malformed transport command '{text}', expected \
         'Get|Set <source|destination> <plate> from|to <stack|stage>'"
    ))
}
