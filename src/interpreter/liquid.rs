//! Liquid-handler table.
//!
//! | verb      | waits (groups in order)                                   | claims                          | effects                                   |
//! |-----------|-----------------------------------------------------------|---------------------------------|-------------------------------------------|
//! | Attach t  | every tool detached                                       |                                 | t attached, t safe                        |
//! | Detach t  | t attached and safe                                       |                                 | t detached, t unwashed                    |
//! | Wash t    | t attached                                                |                                 | t washed, t not transferred, t safe, stage clear |
//! | Transfer t| t washed; both stages occupied, destination not transferred; arm safe | t unsafe, tool on both stages | t transferred, t unwashed, destination transferred |
//! | MoveSafe t| t attached                                                |                                 | t safe, stage clear                       |

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::actuation::Action;
use crate::error::AppResult;
use crate::interpreter::command::{ToolCommand, ToolVerb};
use crate::interpreter::plan::{Condition, Plan};
use crate::interpreter::Interpreter;
use crate::journal::Command;
use crate::labware::{PlateKind, PlateType};
use crate::state::{keys, Scope};

fn stage(plate_type: PlateType, key: &'static str, value: bool) -> Condition {
    Condition::new(Scope::Stage(plate_type), key, value)
}

fn tool_on_stages(present: bool) -> Vec<Condition> {
    PlateType::ALL
        .iter()
        .map(|t| stage(*t, keys::TOOL_PRESENT, present))
        .collect()
}

impl Interpreter {
    pub(crate) fn tool_plan(&self, cmd: &ToolCommand) -> Plan {
        let tool = Scope::tool(cmd.tool.as_str());
        let on = |key: &'static str, value: bool| Condition::new(tool.clone(), key, value);

        match cmd.verb {
            ToolVerb::Attach => {
                let mut detached: Vec<Condition> = self
                    .tools
                    .iter()
                    .map(|id| Condition::new(Scope::tool(id.as_str()), keys::ATTACHED, false))
                    .collect();
                if !self.tools.contains(&cmd.tool) {
                    detached.push(on(keys::ATTACHED, false));
                }
                Plan::new(Action::AttachTool {
                    tool: cmd.tool.clone(),
                })
                .then(detached)
                .effect([on(keys::ATTACHED, true), on(keys::SAFE, true)])
            }
            ToolVerb::Detach => Plan::new(Action::DetachTool {
                tool: cmd.tool.clone(),
            })
            .then([on(keys::ATTACHED, true), on(keys::SAFE, true)])
            .effect([on(keys::ATTACHED, false), on(keys::WASHED, false)]),
            ToolVerb::Wash => Plan::new(Action::WashTool {
                tool: cmd.tool.clone(),
            })
            .then([on(keys::ATTACHED, true)])
            .effect([
                on(keys::WASHED, true),
                on(keys::TRANSFERRED, false),
                on(keys::SAFE, true),
            ])
            .effect(tool_on_stages(false)),
            ToolVerb::Transfer => Plan::new(Action::TransferPins {
                tool: cmd.tool.clone(),
            })
            .then([on(keys::WASHED, true)])
            .then([
                stage(PlateType::Source, keys::OCCUPIED, true),
                stage(PlateType::Destination, keys::OCCUPIED, true),
                stage(PlateType::Destination, keys::TRANSFERRED, false),
            ])
            .then([Condition::new(Scope::Arm, keys::SAFE, true)])
            .claim([on(keys::SAFE, false)])
            .claim(tool_on_stages(true))
            .effect([
                on(keys::TRANSFERRED, true),
                on(keys::WASHED, false),
                stage(PlateType::Destination, keys::TRANSFERRED, true),
            ]),
            ToolVerb::MoveSafe => Plan::new(Action::ToolMoveSafe {
                tool: cmd.tool.clone(),
            })
            .then([on(keys::ATTACHED, true)])
            .effect([on(keys::SAFE, true)])
            .effect(tool_on_stages(false)),
        }
    }

    pub(crate) async fn execute_tool(
        &self,
        origin: &Command,
        cmd: &ToolCommand,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let plan = self.tool_plan(cmd);
        if cmd.verb == ToolVerb::Transfer {
            self.run_plan(origin, &plan, cancel, || self.record_contribution())
                .await
        } else {
            self.run_plan(origin, &plan, cancel, || Ok(())).await
        }
    }

    /// Credit the staged destination plate with the staged source plate's volume.
    fn record_contribution(&self) -> AppResult<()> {
        let mut carousel = self.carousel.lock();
        let source = carousel
            .staged(PlateType::Source)
            .and_then(|p| match p.kind {
                PlateKind::Source { volume, .. } => Some((p.id.clone(), f64::from(volume))),
                PlateKind::Destination { .. } => None,
            });
        let destination = carousel
            .staged(PlateType::Destination)
            .map(|p| p.id.clone());

        match (source, destination) {
            (Some((source_id, volume)), Some(destination_id)) => {
                if let Some(plate) = carousel.plate_mut(&destination_id) {
                    plate.add_contribution(&source_id, volume)?;
                    debug!(source = %source_id, destination = %destination_id, volume, "pinned");
                }
            }
            _ => debug!("no plates tracked on the stage, skipping volume bookkeeping"),
        }
        Ok(())
    }
}
