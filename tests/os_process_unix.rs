// tests/os_process_unix.rs
#![cfg(unix)]

mod common;
use crate::common::builders::{StepConfigBuilder, WorkflowBuilder};
use crate::common::init_tracing;

use std::error::Error;
use std::fs;
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::{Pid, getsid};
use stepflow::engine::Controller;
use stepflow::exec::DetachedLauncher;
use stepflow::probe::{OsProcessProbe, ProcessProbe};
use stepflow::steplog::StepLog;
use stepflow::store::{SqliteStepStore, StepStore};
use stepflow::types::{RunMode, StepState};
use stepflow_test_utils::fakes::SharedBuffer;
use stepflow_test_utils::with_timeout;

type TestResult = Result<(), Box<dyn Error>>;
type OsController = Controller<SqliteStepStore, OsProcessProbe, DetachedLauncher>;

#[test]
fn test_probe_sees_live_and_exited_processes() -> TestResult {
    let probe = OsProcessProbe;
    assert!(probe.is_alive(std::process::id())?);

    let mut child = std::process::Command::new("true").spawn()?;
    let pid = child.id();
    child.wait()?;
    assert!(!probe.is_alive(pid)?);

    assert!(probe.is_alive(0).is_err());
    Ok(())
}

#[tokio::test]
async fn test_detached_worker_gets_contract_and_environment() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let script = r#"echo "step=$3 mode=$6 $7=$8 db=$STEPFLOW_DATABASE" >&2"#;
    let file = WorkflowBuilder::new("detached")
        .home_dir(dir.path())
        .wrapper("/bin/sh", &["-c", script, "worker"])
        .with_step(
            "A",
            StepConfigBuilder::runnable("bin/a.sh").param("input", "x").build(),
        )
        .build();

    let store = SqliteStepStore::open_in_memory()?;
    let mut controller = Controller::for_workflow(
        &file,
        store.clone(),
        OsProcessProbe,
        DetachedLauncher,
        StepLog::from_writer(SharedBuffer::new()),
        RunMode::Test,
    )?;
    let report = controller.snapshot()?;
    assert_eq!(report.launched, 1);

    let record = store.find_step(controller.run_id(), "A")?;
    assert_eq!(record.state, StepState::Running);
    assert!(record.process_id.is_some());

    let err_log = dir.path().join("steps").join("A").join("step.err");
    let expected = format!(
        "step=A mode=test -input=x db={}",
        file.workflow.database.display()
    );
    let contents = with_timeout(async {
        loop {
            let contents = fs::read_to_string(&err_log).unwrap_or_default();
            if contents.contains(&expected) {
                return contents;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(contents.contains(&expected));
    Ok(())
}

fn controller_with_wrapper(
    dir: &std::path::Path,
    program: &str,
    leading: &[&str],
) -> stepflow::errors::Result<(OsController, SqliteStepStore)> {
    let file = WorkflowBuilder::new("os")
        .home_dir(dir)
        .wrapper(program, leading)
        .with_step("A", StepConfigBuilder::runnable("bin/a.sh").build())
        .build();
    let store = SqliteStepStore::open_in_memory()?;
    let controller = Controller::for_workflow(
        &file,
        store.clone(),
        OsProcessProbe,
        DetachedLauncher,
        StepLog::from_writer(SharedBuffer::new()),
        RunMode::Run,
    )?;
    Ok((controller, store))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exited_detached_worker_is_reaped_and_step_fails() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let (mut controller, store) = controller_with_wrapper(dir.path(), "/bin/true", &[])?;

    controller.snapshot()?;
    let pid = store
        .find_step(controller.run_id(), "A")?
        .process_id
        .expect("pid recorded");

    // A zombie would still answer signal 0.
    with_timeout(async {
        while OsProcessProbe.is_alive(pid).unwrap() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    controller.snapshot()?; // acknowledges RUNNING
    controller.snapshot()?;
    assert_eq!(store.find_step(controller.run_id(), "A")?.state, StepState::Failed);
    Ok(())
}

#[tokio::test]
async fn test_exited_worker_is_reaped_on_current_thread_runtime() -> TestResult {
    let dir = tempfile::tempdir()?;
    let (mut controller, store) = controller_with_wrapper(dir.path(), "/bin/true", &[])?;
    controller.snapshot()?;
    let pid = store
        .find_step(controller.run_id(), "A")?
        .process_id
        .expect("pid recorded");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!OsProcessProbe.is_alive(pid)?);
    Ok(())
}

#[tokio::test]
async fn test_detached_worker_leads_its_own_session() -> TestResult {
    let dir = tempfile::tempdir()?;
    let (mut controller, store) =
        controller_with_wrapper(dir.path(), "/bin/sh", &["-c", "sleep 5", "worker"])?;
    controller.snapshot()?;
    let pid = store
        .find_step(controller.run_id(), "A")?
        .process_id
        .expect("pid recorded");

    let worker = Pid::from_raw(pid as i32);
    let session = getsid(Some(worker))?;
    kill(worker, Signal::SIGKILL)?;

    assert_eq!(session, worker);
    assert_ne!(session, getsid(None)?);
    Ok(())
}
