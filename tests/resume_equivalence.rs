//! A job stopped at any point and resumed ends where an uninterrupted run ends.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use common::{demo_journal, settings, sorted_names, StopAfter};
use pin_transfer::actuation::{Action, SimulatedActuator};
use pin_transfer::config::SimulatedDelays;
use pin_transfer::journal::{
    Command, CommandSource, Instrument, Journal, MemoryRunLog, RunLog, RunSnapshot, SnapshotStore,
};
use pin_transfer::runner::{JobController, JobReport};
use pin_transfer::AppResult;

const JOURNAL: &str = "screen-001";

async fn run_log() -> Arc<MemoryRunLog> {
    let run_log = Arc::new(MemoryRunLog::new());
    run_log.create_journal(&demo_journal(JOURNAL)).await.unwrap();
    run_log
}

async fn uninterrupted() -> (JobReport, Vec<Action>) {
    let actuator = Arc::new(SimulatedActuator::instant());
    let controller = JobController::new(settings(), run_log().await, actuator.clone());
    let report = controller
        .start(JOURNAL, &CancellationToken::new())
        .await
        .unwrap();
    (report, actuator.history())
}

/// Start the job, stop it after `stops[0]` actions, resume and stop after
/// `stops[1]` more, and so on; then resume to the end.
async fn interrupted(stops: &[usize]) -> (JobReport, Vec<Action>) {
    let run_log = run_log().await;
    let mut performed = Vec::new();

    for (round, limit) in stops.iter().enumerate() {
        let stop = CancellationToken::new();
        let actuator = Arc::new(StopAfter::new(*limit, stop.clone()));
        let controller = JobController::new(settings(), run_log.clone(), actuator.clone());
        let outcome = if round == 0 {
            controller.start(JOURNAL, &stop).await
        } else {
            let snapshot = run_log.load_current(JOURNAL).await.unwrap();
            controller.resume(snapshot, &stop).await
        };
        let err = outcome.unwrap_err();
        assert!(err.is_cancelled(), "round {round}: {err}");
        performed.extend(actuator.history());
    }

    let snapshot = run_log.load_current(JOURNAL).await.unwrap();
    assert!(!snapshot.completed);
    let actuator = Arc::new(SimulatedActuator::instant());
    let controller = JobController::new(settings(), run_log.clone(), actuator.clone());
    let report = controller
        .resume(snapshot, &CancellationToken::new())
        .await
        .unwrap();
    performed.extend(actuator.history());

    assert!(run_log.snapshot(JOURNAL).unwrap().completed);
    (report, performed)
}

fn assert_equivalent(expected: &(JobReport, Vec<Action>), actual: &(JobReport, Vec<Action>)) {
    let (expected_report, expected_actions) = expected;
    let (report, actions) = actual;
    assert_eq!(report.named_state, expected_report.named_state);
    assert_eq!(report.layout, expected_report.layout);
    assert_eq!(report.cursors, expected_report.cursors);
    // every action ran exactly once across the interrupted runs
    assert_eq!(sorted_names(actions), sorted_names(expected_actions));
}

#[tokio::test]
async fn resume_after_a_single_stop_matches_uninterrupted_run() {
    let expected = uninterrupted().await;
    assert_eq!(expected.0.cursors[&Instrument::LiquidHandler], 10);

    for limit in [1, 2, 4, 7, 11, 15, 19, 23, 27] {
        let actual = interrupted(&[limit]).await;
        assert_equivalent(&expected, &actual);
    }
}

#[tokio::test]
async fn resume_after_repeated_stops_matches_uninterrupted_run() {
    let expected = uninterrupted().await;

    for stops in [&[3, 3, 3][..], &[5, 10], &[1, 1, 1, 1, 1], &[13, 13]] {
        let actual = interrupted(stops).await;
        assert_equivalent(&expected, &actual);
    }
}

#[tokio::test]
async fn stop_before_anything_moves_resumes_from_the_start() {
    let expected = uninterrupted().await;
    let run_log = run_log().await;

    let stop = CancellationToken::new();
    stop.cancel();
    let controller = JobController::new(
        settings(),
        run_log.clone(),
        Arc::new(SimulatedActuator::instant()),
    );
    let err = controller.start(JOURNAL, &stop).await.unwrap_err();
    assert!(err.is_cancelled());

    let snapshot = run_log.load_current(JOURNAL).await.unwrap();
    assert_eq!(snapshot.cursor(Instrument::LiquidHandler), 1);
    assert_eq!(snapshot.cursor(Instrument::PlateTransport), 1);
    assert_eq!(snapshot.current_layout, snapshot.initial_layout);

    let actuator = Arc::new(SimulatedActuator::instant());
    let controller = JobController::new(settings(), run_log, actuator.clone());
    let report = controller
        .resume(snapshot, &CancellationToken::new())
        .await
        .unwrap();
    assert_equivalent(&expected, &(report, actuator.history()));
}

/// Memory run log that keeps every snapshot it was asked to save and yields
/// before storing, so the other runner moves while a save is in flight.
#[derive(Default)]
struct SavedHistory {
    inner: MemoryRunLog,
    saved: Mutex<Vec<RunSnapshot>>,
}

#[async_trait]
impl CommandSource for SavedHistory {
    async fn get(
        &self,
        journal_id: &str,
        instrument: Instrument,
        ordinal: u32,
    ) -> AppResult<Option<Command>> {
        self.inner.get(journal_id, instrument, ordinal).await
    }
}

#[async_trait]
impl SnapshotStore for SavedHistory {
    async fn save(&self, snapshot: &RunSnapshot) -> AppResult<()> {
        self.saved.lock().push(snapshot.clone());
        tokio::task::yield_now().await;
        self.inner.save(snapshot).await
    }

    async fn load_current(&self, journal_id: &str) -> AppResult<RunSnapshot> {
        self.inner.load_current(journal_id).await
    }

    async fn load_most_recent_incomplete(&self) -> AppResult<Option<RunSnapshot>> {
        self.inner.load_most_recent_incomplete().await
    }

    async fn mark_completed(&self, journal_id: &str) -> AppResult<()> {
        self.inner.mark_completed(journal_id).await
    }
}

#[async_trait]
impl RunLog for SavedHistory {
    async fn create_journal(&self, journal: &Journal) -> AppResult<()> {
        self.inner.create_journal(journal).await
    }

    async fn journal(&self, journal_id: &str) -> AppResult<Journal> {
        self.inner.journal(journal_id).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_snapshot_of_a_timed_run_resumes_to_the_same_end() {
    let expected = uninterrupted().await;

    let history = Arc::new(SavedHistory::default());
    history.create_journal(&demo_journal(JOURNAL)).await.unwrap();
    let delays = SimulatedDelays {
        wash_ms: 2,
        transfer_ms: 1,
        plate_move_ms: 1,
        rotate_ms: 1,
        ..SimulatedDelays::instant()
    };
    let controller = JobController::new(
        settings(),
        history.clone(),
        Arc::new(SimulatedActuator::new(delays)),
    );
    let report = controller
        .start(JOURNAL, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.named_state, expected.0.named_state);
    assert_eq!(report.layout, expected.0.layout);

    let saved = history.saved.lock().clone();
    assert!(saved.len() > 25);
    for (n, snapshot) in saved.into_iter().enumerate() {
        let cursors = snapshot.cursors.clone();
        let controller = JobController::new(
            settings(),
            run_log().await,
            Arc::new(SimulatedActuator::instant()),
        );
        let resumed = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            controller.resume(snapshot, &CancellationToken::new()),
        )
        .await
        .unwrap_or_else(|_| panic!("snapshot {n} at {cursors:?} never finished"))
        .unwrap_or_else(|err| panic!("snapshot {n} at {cursors:?}: {err}"));
        assert_eq!(resumed.named_state, expected.0.named_state, "snapshot {n}");
        assert_eq!(resumed.layout, expected.0.layout, "snapshot {n}");
        assert_eq!(resumed.cursors, expected.0.cursors, "snapshot {n}");
    }
}
