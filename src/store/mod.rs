// src/store/mod.rs

//! Persistence adapter for step records.
//!
//! The controller, the worker wrapper and operator tools all mutate the same
//! step table. Every mutation is a [`ConditionalUpdate`]: a fixed set of
//! column assignments guarded by a precondition on the row's current values.
//! The store reports whether the row matched ([`WriteOutcome::Applied`]) or
//! whether another actor got there first ([`WriteOutcome::Lost`]); callers
//! branch on that instead of assuming success.
//!
//! - [`sqlite`] provides the production implementation on top of `rusqlite`.

pub mod sqlite;

use std::path::Path;

use crate::errors::Result;
use crate::types::StepState;

pub use sqlite::SqliteStepStore;

/// One persisted step row, as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step_id: i64,
    /// Fully qualified step name, unique within a run.
    pub name: String,
    pub state: StepState,
    /// True once the controller has acknowledged the current state/offline pair.
    pub handled: bool,
    pub offline: bool,
    pub process_id: Option<u32>,
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The precondition matched and the row was updated.
    Applied,
    /// Zero rows matched: some other actor moved the step first.
    Lost,
}

impl WriteOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

/// Column assignments of a conditional update. `None` leaves a column as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    pub state: Option<StepState>,
    pub handled: Option<bool>,
    pub offline: Option<bool>,
    /// `Some(None)` clears the column.
    pub process_id: Option<Option<u32>>,
}

/// Precondition a row must satisfy for the update to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Precondition {
    pub state: Option<StepState>,
    pub offline: Option<bool>,
    /// Require that no process id is recorded.
    pub no_process: bool,
}

/// `UPDATE ... SET <assignment> WHERE step_id = ? AND <precondition>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalUpdate {
    pub step_id: i64,
    pub set: Assignment,
    pub expect: Precondition,
}

impl ConditionalUpdate {
    pub fn for_step(step_id: i64) -> Self {
        Self {
            step_id,
            set: Assignment::default(),
            expect: Precondition::default(),
        }
    }

    pub fn set_state(mut self, state: StepState) -> Self {
        self.set.state = Some(state);
        self
    }

    pub fn set_handled(mut self, handled: bool) -> Self {
        self.set.handled = Some(handled);
        self
    }

    pub fn set_offline(mut self, offline: bool) -> Self {
        self.set.offline = Some(offline);
        self
    }

    pub fn set_process_id(mut self, pid: u32) -> Self {
        self.set.process_id = Some(Some(pid));
        self
    }

    pub fn clear_process_id(mut self) -> Self {
        self.set.process_id = Some(None);
        self
    }

    pub fn expect_state(mut self, state: StepState) -> Self {
        self.expect.state = Some(state);
        self
    }

    pub fn expect_offline(mut self, offline: bool) -> Self {
        self.expect.offline = Some(offline);
        self
    }

    pub fn expect_no_process(mut self) -> Self {
        self.expect.no_process = true;
        self
    }
}

/// Storage operations the scheduler core needs.
///
/// Every access is a short, independently committed statement; nothing holds
/// a transaction open across a controller pass.
pub trait StepStore {
    /// Create the run (if absent) and insert any missing steps as READY.
    /// Returns the run identifier. Existing rows are left untouched.
    fn materialize(&self, workflow: &str, home_dir: &Path, steps: &[&str]) -> Result<i64>;

    /// Look up an existing run by workflow name.
    fn find_run(&self, workflow: &str) -> Result<Option<i64>>;

    /// All step rows of a run.
    fn load_steps(&self, run_id: i64) -> Result<Vec<StepRecord>>;

    /// One step row by fully qualified name.
    fn find_step(&self, run_id: i64, name: &str) -> Result<StepRecord>;

    /// Fresh read of a single step's state, bypassing any in-memory copy.
    fn fetch_state(&self, step_id: i64) -> Result<StepState>;

    /// Apply a conditional update, reporting whether the row matched.
    fn apply(&self, update: &ConditionalUpdate) -> Result<WriteOutcome>;
}
