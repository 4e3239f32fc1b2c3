// tests/race.rs

mod common;
use crate::common::init_tracing;

use std::error::Error;
use std::sync::{Arc, Barrier};
use std::thread;

use stepflow::store::{ConditionalUpdate, SqliteStepStore, StepStore, WriteOutcome};
use stepflow::types::StepState;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn test_concurrent_writers_with_same_precondition_exactly_one_wins() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("data").join("race.db");

    let setup = SqliteStepStore::open(&db)?;
    let run_id = setup.materialize("race", dir.path(), &["A"])?;
    let step_id = setup.find_step(run_id, "A")?.step_id;
    let promote = ConditionalUpdate::for_step(step_id)
        .set_state(StepState::OnDeck)
        .expect_state(StepState::Ready);
    assert_eq!(setup.apply(&promote)?, WriteOutcome::Applied);

    for _ in 0..10 {
        // Two independent connections, as the controller and a worker would have.
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let db = db.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let store = SqliteStepStore::open(&db).unwrap();
                    let claim = ConditionalUpdate::for_step(step_id)
                        .set_state(StepState::Running)
                        .expect_state(StepState::OnDeck)
                        .expect_offline(false);
                    barrier.wait();
                    store.apply(&claim).unwrap()
                })
            })
            .collect();

        let outcomes: Vec<WriteOutcome> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let applied = outcomes.iter().filter(|o| o.is_applied()).count();
        assert_eq!(applied, 1, "outcomes: {outcomes:?}");
        assert!(outcomes.contains(&WriteOutcome::Lost));

        let reset = ConditionalUpdate::for_step(step_id)
            .set_state(StepState::OnDeck)
            .expect_state(StepState::Running);
        assert!(setup.apply(&reset)?.is_applied());
    }
    Ok(())
}

#[test]
fn test_lost_write_leaves_row_untouched() -> TestResult {
    init_tracing();
    let store = SqliteStepStore::open_in_memory()?;
    let run_id = store.materialize("lost", std::path::Path::new("/tmp"), &["A"])?;
    let before = store.find_step(run_id, "A")?;

    let stale = ConditionalUpdate::for_step(before.step_id)
        .set_state(StepState::Failed)
        .set_handled(false)
        .clear_process_id()
        .expect_state(StepState::Running);

    assert_eq!(store.apply(&stale)?, WriteOutcome::Lost);
    assert_eq!(store.find_step(run_id, "A")?, before);
    Ok(())
}
