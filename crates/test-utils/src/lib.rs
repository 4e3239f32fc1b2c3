pub mod builders;
pub mod fakes;

use std::sync::Once;

use stepflow::config::WorkflowFile;
use stepflow::engine::Controller;
use stepflow::errors::Result;
use stepflow::steplog::StepLog;
use stepflow::store::{SqliteStepStore, StepStore};
use stepflow::types::{RunMode, StepState};
use tracing_subscriber::{EnvFilter, fmt};

use crate::fakes::{FakeProbe, RecordingLauncher, SharedBuffer};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

pub type TestController = Controller<SqliteStepStore, FakeProbe, RecordingLauncher>;

/// An in-memory store plus scriptable probe and launcher, sharing state with
/// every controller built from it.
pub struct Harness {
    pub file: WorkflowFile,
    pub store: SqliteStepStore,
    pub probe: FakeProbe,
    pub launcher: RecordingLauncher,
    pub steplog: SharedBuffer,
}

impl Harness {
    pub fn new(file: WorkflowFile) -> Self {
        let store = SqliteStepStore::open_in_memory().expect("in-memory store");
        Self::with_store(file, store)
    }

    pub fn with_store(file: WorkflowFile, store: SqliteStepStore) -> Self {
        let probe = FakeProbe::new();
        let launcher = RecordingLauncher::new(probe.clone());
        Self {
            file,
            store,
            probe,
            launcher,
            steplog: SharedBuffer::new(),
        }
    }

    /// A controller in `run` mode over the shared collaborators.
    pub fn controller(&self) -> Result<TestController> {
        self.controller_in(RunMode::Run)
    }

    pub fn controller_in(&self, mode: RunMode) -> Result<TestController> {
        Controller::for_workflow(
            &self.file,
            self.store.clone(),
            self.probe.clone(),
            self.launcher.clone(),
            StepLog::from_writer(self.steplog.clone()),
            mode,
        )
    }

    pub fn run_id(&self) -> i64 {
        self.store
            .find_run(&self.file.workflow.name)
            .expect("store read")
            .expect("run materialized")
    }

    pub fn state_of(&self, step: &str) -> StepState {
        self.store
            .find_step(self.run_id(), step)
            .expect("step exists")
            .state
    }

    pub fn step_id(&self, step: &str) -> i64 {
        self.store
            .find_step(self.run_id(), step)
            .expect("step exists")
            .step_id
    }
}
