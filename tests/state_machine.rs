// tests/state_machine.rs

mod common;
use crate::common::builders::{StepConfigBuilder, WorkflowBuilder};
use crate::common::{init_tracing, line};

use std::cell::Cell;
use std::error::Error;
use std::io;
use std::path::Path;

use stepflow::admin;
use stepflow::config::WorkflowFile;
use stepflow::engine::Controller;
use stepflow::errors::{Result as StepflowResult, StepflowError};
use stepflow::probe::ProcessProbe;
use stepflow::steplog::StepLog;
use stepflow::store::{
    ConditionalUpdate, SqliteStepStore, StepRecord, StepStore, WriteOutcome,
};
use stepflow::types::{RunMode, StepState};
use stepflow_test_utils::Harness;
use stepflow_test_utils::fakes::{FakeProbe, RecordingLauncher, SharedBuffer};

type TestResult = Result<(), Box<dyn Error>>;

fn single_runnable() -> WorkflowFile {
    WorkflowBuilder::new("single")
        .with_step("A", StepConfigBuilder::runnable("bin/a.sh").build())
        .build()
}

#[test]
fn test_dead_worker_fails_step_and_recovery_is_idempotent() -> TestResult {
    init_tracing();
    let h = Harness::new(single_runnable());
    let mut controller = h.controller()?;

    // Pass 1: READY -> ON_DECK -> RUNNING with a recorded pid.
    controller.snapshot()?;
    let record = h.store.find_step(h.run_id(), "A")?;
    assert_eq!(record.state, StepState::Running);
    let pid = h.launcher.pid_of("A").expect("worker launched");
    assert_eq!(record.process_id, Some(pid));

    // Pass 2 acknowledges RUNNING; the worker is alive.
    controller.snapshot()?;
    assert_eq!(h.state_of("A"), StepState::Running);

    h.probe.kill(pid);
    controller.snapshot()?;

    let record = h.store.find_step(h.run_id(), "A")?;
    assert_eq!(record.state, StepState::Failed);
    assert_eq!(record.process_id, None);
    assert!(record.handled);
    assert!(h.steplog.lines().contains(&line("FAILED", "***", "A")));

    let lines_before = h.steplog.lines().len();
    controller.snapshot()?;
    controller.snapshot()?;
    assert_eq!(h.store.find_step(h.run_id(), "A")?, record);
    assert_eq!(h.steplog.lines().len(), lines_before);
    assert_eq!(h.launcher.launched_steps(), vec!["A".to_string()]);
    Ok(())
}

#[test]
fn test_running_step_without_pid_counts_as_dead() -> TestResult {
    init_tracing();
    let h = Harness::new(single_runnable());
    let mut controller = h.controller()?;

    admin::force_state(&h.store, h.run_id(), "A", StepState::Running)?;
    controller.snapshot()?; // acknowledges the forced state
    assert_eq!(h.state_of("A"), StepState::Running);

    controller.snapshot()?;
    assert_eq!(h.state_of("A"), StepState::Failed);
    assert!(h.launcher.launched().is_empty());
    Ok(())
}

/// Probe that lets the worker report DONE while the controller is probing.
struct RacingProbe {
    store: SqliteStepStore,
    step_id: i64,
}

impl ProcessProbe for RacingProbe {
    fn is_alive(&self, _pid: u32) -> StepflowResult<bool> {
        admin::report_outcome(&self.store, self.step_id, StepState::Done)?;
        Ok(false)
    }
}

#[test]
fn test_worker_reporting_during_probe_wins_the_race() -> TestResult {
    init_tracing();
    let h = Harness::new(single_runnable());
    let mut first = h.controller()?;
    first.snapshot()?; // launch
    first.snapshot()?; // acknowledge RUNNING

    let log = SharedBuffer::new();
    let probe = RacingProbe {
        store: h.store.clone(),
        step_id: h.step_id("A"),
    };
    let mut controller = Controller::for_workflow(
        &h.file,
        h.store.clone(),
        probe,
        RecordingLauncher::new(FakeProbe::new()),
        StepLog::from_writer(log.clone()),
        RunMode::Run,
    )?;

    controller.snapshot()?;
    assert_eq!(h.state_of("A"), StepState::Done);
    assert!(!log.contents().contains("FAILED"));

    // Next pass acknowledges the worker's DONE.
    controller.snapshot()?;
    assert!(log.lines().contains(&line("DONE", "", "A")));
    Ok(())
}

#[test]
fn test_offline_step_is_never_promoted() -> TestResult {
    init_tracing();
    let h = Harness::new(single_runnable());
    let mut controller = h.controller()?;

    admin::set_offline(&h.store, h.run_id(), "A", true)?;
    for _ in 0..3 {
        controller.snapshot()?;
        assert_eq!(h.state_of("A"), StepState::Ready);
    }
    assert!(h.launcher.launched().is_empty());
    assert!(h.steplog.lines().contains(&line("", "OFFLINE", "A")));

    admin::set_offline(&h.store, h.run_id(), "A", false)?;
    controller.snapshot()?; // acknowledges ONLINE, then promotes
    assert!(h.steplog.lines().contains(&line("", "ONLINE", "A")));
    assert_eq!(h.state_of("A"), StepState::Running);
    Ok(())
}

#[test]
fn test_offline_toggle_on_running_step_only_logs() -> TestResult {
    init_tracing();
    let h = Harness::new(single_runnable());
    let mut controller = h.controller()?;
    controller.snapshot()?;
    controller.snapshot()?;
    let pid = h.launcher.pid_of("A").expect("launched");

    admin::set_offline(&h.store, h.run_id(), "A", true)?;
    h.steplog.clear();
    controller.snapshot()?;

    assert_eq!(h.steplog.lines(), vec![line("", "OFFLINE", "A")]);
    let record = h.store.find_step(h.run_id(), "A")?;
    assert_eq!(record.state, StepState::Running);
    assert_eq!(record.process_id, Some(pid));
    assert!(record.handled);
    assert!(h.probe.is_alive(pid)?);

    // The worker's terminal write is unaffected by the flag.
    admin::report_outcome(&h.store, record.step_id, StepState::Done)?;
    controller.snapshot()?;
    assert_eq!(h.state_of("A"), StepState::Done);
    assert!(h.steplog.lines().contains(&line("DONE", "", "A")));
    Ok(())
}

#[test]
fn test_promotion_requires_every_parent_done() -> TestResult {
    init_tracing();
    let file = WorkflowBuilder::new("join")
        .with_step("P1", StepConfigBuilder::runnable("bin/p1.sh").build())
        .with_step("P2", StepConfigBuilder::runnable("bin/p2.sh").build())
        .with_step(
            "C",
            StepConfigBuilder::runnable("bin/c.sh").after("P1").after("P2").build(),
        )
        .build();
    let h = Harness::new(file);
    let mut controller = h.controller()?;

    admin::force_state(&h.store, h.run_id(), "P1", StepState::Done)?;
    admin::force_state(&h.store, h.run_id(), "P2", StepState::Failed)?;
    controller.snapshot()?;
    controller.snapshot()?;
    assert_eq!(h.state_of("C"), StepState::Ready);
    assert!(h.launcher.launched().is_empty());

    admin::force_state(&h.store, h.run_id(), "P2", StepState::Done)?;
    controller.snapshot()?;
    assert_eq!(h.state_of("C"), StepState::Running);
    assert_eq!(h.launcher.launched_steps(), vec!["C".to_string()]);
    Ok(())
}

#[test]
fn test_first_pass_after_restart_logs_unhandled_steps_once() -> TestResult {
    init_tracing();
    let h = Harness::new(single_runnable());
    h.controller()?.snapshot()?; // launches A, row left unhandled

    // A fresh controller has never seen A; it logs RUNNING exactly once and
    // does not launch a second worker.
    let mut restarted = h.controller()?;
    h.steplog.clear();
    restarted.snapshot()?;
    restarted.snapshot()?;

    assert_eq!(h.steplog.lines(), vec![line("RUNNING", "", "A")]);
    assert_eq!(h.launcher.launched().len(), 1);
    Ok(())
}

/// Store whose next pid write fails, as under a locked database.
struct PidWriteFails {
    inner: SqliteStepStore,
    fail_next: Cell<bool>,
}

impl StepStore for PidWriteFails {
    fn materialize(&self, workflow: &str, home_dir: &Path, steps: &[&str]) -> StepflowResult<i64> {
        self.inner.materialize(workflow, home_dir, steps)
    }

    fn find_run(&self, workflow: &str) -> StepflowResult<Option<i64>> {
        self.inner.find_run(workflow)
    }

    fn load_steps(&self, run_id: i64) -> StepflowResult<Vec<StepRecord>> {
        self.inner.load_steps(run_id)
    }

    fn find_step(&self, run_id: i64, name: &str) -> StepflowResult<StepRecord> {
        self.inner.find_step(run_id, name)
    }

    fn fetch_state(&self, step_id: i64) -> StepflowResult<StepState> {
        self.inner.fetch_state(step_id)
    }

    fn apply(&self, update: &ConditionalUpdate) -> StepflowResult<WriteOutcome> {
        if matches!(update.set.process_id, Some(Some(_))) && self.fail_next.replace(false) {
            return Err(StepflowError::IoError(io::Error::other("database is locked")));
        }
        self.inner.apply(update)
    }
}

#[test]
fn test_failed_pid_write_is_retried_and_live_worker_keeps_running() -> TestResult {
    init_tracing();
    let h = Harness::new(single_runnable());
    let store = PidWriteFails {
        inner: h.store.clone(),
        fail_next: Cell::new(true),
    };
    let mut controller = Controller::for_workflow(
        &h.file,
        store,
        h.probe.clone(),
        h.launcher.clone(),
        StepLog::from_writer(h.steplog.clone()),
        RunMode::Run,
    )?;

    assert!(controller.snapshot().is_err());
    let pid = h.launcher.pid_of("A").expect("worker launched");
    let record = h.store.find_step(h.run_id(), "A")?;
    assert_eq!(record.state, StepState::Running);
    assert_eq!(record.process_id, None);

    controller.snapshot()?;
    assert_eq!(h.store.find_step(h.run_id(), "A")?.process_id, Some(pid));

    for _ in 0..3 {
        controller.snapshot()?;
        assert_eq!(h.state_of("A"), StepState::Running);
    }
    assert!(!h.steplog.contents().contains("FAILED"));
    assert_eq!(h.launcher.launched().len(), 1);

    admin::report_outcome(&h.store, record.step_id, StepState::Done)?;
    controller.snapshot()?;
    assert_eq!(h.state_of("A"), StepState::Done);
    Ok(())
}

#[test]
fn test_worker_registered_pid_keeps_claimed_step_alive() -> TestResult {
    init_tracing();
    let h = Harness::new(single_runnable());
    let mut controller = h.controller()?;

    // A claim with no pid, as left by a controller that died mid-dispatch.
    admin::force_state(&h.store, h.run_id(), "A", StepState::Running)?;
    let step_id = h.step_id("A");
    h.probe.spawn(777);
    assert_eq!(admin::register_worker(&h.store, step_id, 777)?, WriteOutcome::Applied);
    assert_eq!(admin::register_worker(&h.store, step_id, 778)?, WriteOutcome::Lost);

    controller.snapshot()?;
    controller.snapshot()?;
    let record = h.store.find_step(h.run_id(), "A")?;
    assert_eq!(record.state, StepState::Running);
    assert_eq!(record.process_id, Some(777));

    h.probe.kill(777);
    controller.snapshot()?;
    assert_eq!(h.state_of("A"), StepState::Failed);
    Ok(())
}
