//! End-to-end jobs through the controller with an in-memory run log.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use common::{demo_journal, settings, until_parked, RequestLog};
use pin_transfer::actuation::{Action, Actuator, SimulatedActuator};
use pin_transfer::journal::{Instrument, Journal, MemoryRunLog, RunLog, SnapshotStore};
use pin_transfer::labware::{Plate, PlateKind, PlateLocation, PlateType, SlotAddress};
use pin_transfer::runner::{JobController, RunnerState};
use pin_transfer::state::{keys, Scope, StateStore};
use pin_transfer::{AppResult, TransferError};

async fn controller_with(
    journal: Journal,
    actuator: Arc<dyn Actuator>,
) -> JobController<MemoryRunLog> {
    let run_log = Arc::new(MemoryRunLog::new());
    run_log.create_journal(&journal).await.unwrap();
    JobController::new(settings(), run_log, actuator)
}

/// Records each action with the carousel-safe flag seen while it ran.
#[derive(Default)]
struct SafetyRecorder {
    store: OnceCell<Arc<StateStore>>,
    seen: Mutex<Vec<(Action, bool)>>,
}

#[async_trait]
impl Actuator for SafetyRecorder {
    async fn actuate(&self, action: &Action, _cancel: &CancellationToken) -> AppResult<()> {
        let safe = self
            .store
            .get()
            .is_some_and(|store| store.get(&Scope::Carousel, keys::SAFE));
        self.seen.lock().push((action.clone(), safe));
        Ok(())
    }
}

#[tokio::test]
async fn attach_from_fresh_state() {
    let actuator = Arc::new(SimulatedActuator::instant());
    let journal = Journal::new("attach").with_commands(Instrument::LiquidHandler, ["Attach 100"]);
    let controller = controller_with(journal, actuator.clone()).await;

    let report = controller
        .start("attach", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        actuator.history(),
        vec![Action::AttachTool { tool: "100".into() }]
    );
    let tool = &report.named_state[&Scope::tool("100")];
    assert_eq!(tool.get(keys::ATTACHED), Some(&true));
    assert_eq!(tool.get(keys::SAFE), Some(&true));
    assert_eq!(report.cursors[&Instrument::LiquidHandler], 2);
    assert_eq!(report.cursors[&Instrument::PlateTransport], 1);
}

#[tokio::test]
async fn get_from_stack_rotates_carousel_first() {
    let recorder = Arc::new(SafetyRecorder::default());
    let journal = Journal::new("rotate")
        .with_commands(
            Instrument::PlateTransport,
            ["Get destination plate7 from stack"],
        )
        .with_plate(Plate::destination("plate7", SlotAddress::new(4, 2)));
    let controller = controller_with(journal, recorder.clone()).await;
    recorder.store.set(controller.store().clone()).ok();

    let report = controller
        .start("rotate", &CancellationToken::new())
        .await
        .unwrap();

    let seen = recorder.seen.lock().clone();
    assert_eq!(
        seen,
        vec![
            (Action::RotateCarousel { stacker: 4 }, false),
            (
                Action::GetFromStack {
                    plate_id: "plate7".into(),
                    plate_type: PlateType::Destination,
                    slot: SlotAddress::new(4, 2),
                },
                true
            ),
        ]
    );
    assert_eq!(report.named_state[&Scope::Carousel].get(keys::SAFE), Some(&true));
    assert_eq!(
        report.named_state[&Scope::Arm].get(keys::PLATE_GRIPPED),
        Some(&true)
    );
    assert_eq!(report.layout.current_position, 4);
    assert_eq!(
        report.layout.plate("plate7").unwrap().location,
        PlateLocation::Gripper
    );
}

#[tokio::test]
async fn demo_journal_runs_to_completion() {
    let actuator = Arc::new(SimulatedActuator::instant());
    let controller = controller_with(demo_journal("demo"), actuator.clone()).await;
    let mut liquid = controller.subscribe(Instrument::LiquidHandler).unwrap();
    let transport = controller.subscribe(Instrument::PlateTransport).unwrap();

    let report = controller
        .start("demo", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.cursors[&Instrument::LiquidHandler], 10);
    assert_eq!(report.cursors[&Instrument::PlateTransport], 17);
    assert!(liquid.has_changed().unwrap());
    assert_eq!(*liquid.borrow_and_update(), RunnerState::Done);
    assert_eq!(*transport.borrow(), RunnerState::Done);

    // 9 tool actions, 16 transport actions and three rotations (to 4, 5, 1)
    let history = actuator.history();
    assert_eq!(history.len(), 28);
    let rotations: Vec<usize> = history
        .iter()
        .filter_map(|a| match a {
            Action::RotateCarousel { stacker } => Some(*stacker),
            _ => None,
        })
        .collect();
    assert_eq!(rotations, vec![4, 5, 1]);
    assert_eq!(
        history
            .iter()
            .filter(|a| matches!(a, Action::TransferPins { .. }))
            .count(),
        2
    );

    let tool = &report.named_state[&Scope::tool("100")];
    assert_eq!(tool.get(keys::ATTACHED), Some(&false));
    assert_eq!(tool.get(keys::WASHED), Some(&false));
    let arm = &report.named_state[&Scope::Arm];
    assert_eq!(arm.get(keys::HOMED), Some(&true));
    assert_eq!(arm.get(keys::PLATE_GRIPPED), Some(&false));
    for plate_type in PlateType::ALL {
        let stage = &report.named_state[&Scope::Stage(plate_type)];
        assert_eq!(stage.get(keys::OCCUPIED), Some(&false));
        assert_eq!(stage.get(keys::TOOL_PRESENT), Some(&false));
    }

    // every plate is back on a shelf; dst-002 went to its target
    assert_eq!(report.layout.current_position, 1);
    let at = |id: &str| report.layout.plate(id).unwrap().location;
    assert_eq!(at("src-001"), PlateLocation::Stacker(SlotAddress::new(1, 1)));
    assert_eq!(at("dst-001"), PlateLocation::Stacker(SlotAddress::new(4, 1)));
    assert_eq!(at("dst-002"), PlateLocation::Stacker(SlotAddress::new(5, 1)));
    for id in ["dst-001", "dst-002"] {
        let plate = report.layout.plate(id).unwrap();
        assert!(plate.flag("transferred"));
        match &plate.kind {
            PlateKind::Destination { sources } => {
                assert_eq!(sources.get("src-001"), Some(&50.0));
            }
            other => panic!("{id} should be a destination, got {other:?}"),
        }
    }

    let snapshot = controller.run_log().snapshot("demo").unwrap();
    assert!(snapshot.completed);
    assert_eq!(snapshot.current_layout, report.layout);
    // initial save, one per command and one per runner exit
    assert_eq!(controller.run_log().save_count(), 1 + 9 + 16 + 2);
}

#[tokio::test]
async fn cancel_while_blocked_then_resume_blocks_again() {
    let journal = Journal::new("blocked")
        .with_commands(Instrument::LiquidHandler, ["Attach 100", "Transfer 100"]);
    let actuator = Arc::new(SimulatedActuator::instant());
    let controller = controller_with(journal, actuator.clone()).await;
    let tool = Scope::tool("100");

    let cancel = CancellationToken::new();
    let (outcome, ()) = tokio::join!(controller.start("blocked", &cancel), async {
        until_parked(controller.store(), &tool, keys::WASHED, 1).await;
        cancel.cancel();
    });
    assert!(outcome.unwrap_err().is_cancelled());

    let snapshot = controller.run_log().load_current("blocked").await.unwrap();
    assert!(!snapshot.completed);
    assert_eq!(snapshot.cursor(Instrument::LiquidHandler), 2);
    assert_eq!(snapshot.cursor(Instrument::PlateTransport), 1);
    assert_eq!(snapshot.named_state[&tool].get(keys::ATTACHED), Some(&true));
    assert_eq!(controller.store().parked(&tool, keys::WASHED), 0);

    // the resumed runner picks up at Transfer and waits on the same condition
    let cancel = CancellationToken::new();
    let (outcome, ()) = tokio::join!(controller.resume(snapshot, &cancel), async {
        until_parked(controller.store(), &tool, keys::WASHED, 1).await;
        cancel.cancel();
    });
    assert!(outcome.unwrap_err().is_cancelled());
    assert_eq!(
        actuator.history(),
        vec![Action::AttachTool { tool: "100".into() }]
    );
    let snapshot = controller.run_log().load_current("blocked").await.unwrap();
    assert_eq!(snapshot.cursor(Instrument::LiquidHandler), 2);
}

#[tokio::test]
async fn failing_runner_stops_its_sibling_only() {
    let journal = Journal::new("ghost")
        .with_commands(Instrument::LiquidHandler, ["Attach 100", "Transfer 100"])
        .with_commands(Instrument::PlateTransport, ["Get source ghost from stack"]);
    let controller = controller_with(journal, Arc::new(RequestLog::default())).await;
    let cancel = CancellationToken::new();

    let err = controller.start("ghost", &cancel).await.unwrap_err();

    assert!(err.is_not_found(), "unexpected error: {err}");
    assert!(!cancel.is_cancelled());
    let liquid = controller.subscribe(Instrument::LiquidHandler).unwrap();
    let transport = controller.subscribe(Instrument::PlateTransport).unwrap();
    assert_eq!(*transport.borrow(), RunnerState::Failed);
    assert!(liquid.borrow().is_terminal());

    let snapshot = controller.run_log().snapshot("ghost").unwrap();
    assert!(!snapshot.completed);
    assert_eq!(snapshot.cursor(Instrument::PlateTransport), 1);
}

#[tokio::test]
async fn unparseable_command_fails_the_job() {
    let journal =
        Journal::new("typo").with_commands(Instrument::LiquidHandler, ["Attach 100", "Polish 100"]);
    let controller = controller_with(journal, Arc::new(SimulatedActuator::instant())).await;

    let err = controller
        .start("typo", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::InvalidOperation(_)), "{err}");

    let snapshot = controller.run_log().snapshot("typo").unwrap();
    assert_eq!(snapshot.cursor(Instrument::LiquidHandler), 2);
}

#[tokio::test]
async fn plate_outside_the_carousel_fails_with_a_snapshot_written() {
    let journal = Journal::new("far")
        .with_commands(
            Instrument::PlateTransport,
            ["Get destination far-1 from stack"],
        )
        .with_plate(Plate::destination("far-1", SlotAddress::new(9, 1)));
    let actuator = Arc::new(SimulatedActuator::instant());
    let controller = controller_with(journal, actuator.clone()).await;

    let err = controller
        .start("far", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::InvalidOperation(_)), "{err}");
    assert!(actuator.history().is_empty());

    let snapshot = controller.run_log().snapshot("far").unwrap();
    assert!(!snapshot.completed);
    assert_eq!(snapshot.cursor(Instrument::PlateTransport), 1);
    assert_eq!(
        snapshot.current_layout.plates[0].location,
        PlateLocation::Stacker(SlotAddress::new(9, 1))
    );
    let pending = controller
        .run_log()
        .load_most_recent_incomplete()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.journal_id, "far");
}

#[tokio::test]
async fn only_one_job_at_a_time() {
    let journal = Journal::new("first")
        .with_commands(Instrument::LiquidHandler, ["Attach 100", "Transfer 100"]);
    let controller = controller_with(journal, Arc::new(SimulatedActuator::instant())).await;
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(controller.start("first", &cancel), async {
        until_parked(controller.store(), &Scope::tool("100"), keys::WASHED, 1).await;
        let second = controller.start("first", &CancellationToken::new()).await;
        cancel.cancel();
        second
    });

    assert!(first.unwrap_err().is_cancelled());
    assert!(matches!(
        second.unwrap_err(),
        TransferError::InvalidOperation(_)
    ));
}

#[tokio::test]
async fn completed_job_cannot_be_resumed() {
    let journal = Journal::new("done").with_commands(Instrument::LiquidHandler, ["Attach 100"]);
    let controller = controller_with(journal, Arc::new(SimulatedActuator::instant())).await;
    let cancel = CancellationToken::new();
    controller.start("done", &cancel).await.unwrap();

    let snapshot = controller.run_log().load_current("done").await.unwrap();
    let err = controller.resume(snapshot, &cancel).await.unwrap_err();
    assert!(matches!(err, TransferError::InvalidOperation(_)));
    assert!(controller
        .resume_unfinished(&cancel)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn start_resets_state_left_by_a_previous_job() {
    let run_log = Arc::new(MemoryRunLog::new());
    run_log
        .create_journal(
            &Journal::new("one").with_commands(Instrument::LiquidHandler, ["Attach 100"]),
        )
        .await
        .unwrap();
    run_log
        .create_journal(
            &Journal::new("two").with_commands(Instrument::LiquidHandler, ["Attach 96"]),
        )
        .await
        .unwrap();
    let controller = JobController::new(
        settings(),
        run_log,
        Arc::new(SimulatedActuator::instant()),
    );
    let cancel = CancellationToken::new();

    controller.start("one", &cancel).await.unwrap();
    // tool 100 still attached would block Attach 96 forever without the reset
    let report = controller.start("two", &cancel).await.unwrap();

    assert!(!report.named_state.contains_key(&Scope::tool("100")));
    assert_eq!(
        report.named_state[&Scope::tool("96")].get(keys::ATTACHED),
        Some(&true)
    );
}
