// src/admin.rs

//! Writes made by actors other than the controller: operators and workers.
//!
//! Each write leaves the row un-handled so the controller logs the change on
//! its next pass.

use anyhow::anyhow;
use tracing::info;

use crate::errors::{Result, StepflowError};
use crate::store::{ConditionalUpdate, StepStore, WriteOutcome};
use crate::types::StepState;

/// Toggle a step's offline flag. `Lost` means the flag already had that value
/// or changed concurrently.
///
/// Taking a RUNNING step offline does not stop its worker.
pub fn set_offline<S: StepStore + ?Sized>(
    store: &S,
    run_id: i64,
    step: &str,
    offline: bool,
) -> Result<WriteOutcome> {
    let record = store.find_step(run_id, step)?;
    let update = ConditionalUpdate::for_step(record.step_id)
        .set_offline(offline)
        .set_handled(false)
        .expect_offline(!offline);

    let outcome = store.apply(&update)?;
    if outcome.is_applied() {
        info!(step, offline, "offline flag changed");
    }
    Ok(outcome)
}

/// Operator reset: move a step to any state, clearing its process id.
///
/// Guarded by the state read just before, so a concurrent transition wins.
pub fn force_state<S: StepStore + ?Sized>(
    store: &S,
    run_id: i64,
    step: &str,
    state: StepState,
) -> Result<WriteOutcome> {
    let record = store.find_step(run_id, step)?;
    let update = ConditionalUpdate::for_step(record.step_id)
        .set_state(state)
        .set_handled(false)
        .clear_process_id()
        .expect_state(record.state);

    let outcome = store.apply(&update)?;
    if outcome.is_applied() {
        info!(step, from = %record.state, to = %state, "state forced");
    }
    Ok(outcome)
}

/// Worker-side registration of its own pid on a claimed step.
///
/// Only fills an empty `process_id`, so `Lost` usually means the dispatcher
/// already recorded the same pid.
pub fn register_worker<S: StepStore + ?Sized>(
    store: &S,
    step_id: i64,
    pid: u32,
) -> Result<WriteOutcome> {
    let update = ConditionalUpdate::for_step(step_id)
        .set_process_id(pid)
        .expect_state(StepState::Running)
        .expect_no_process();

    store.apply(&update)
}

/// Worker-side terminal write: RUNNING to DONE or FAILED.
pub fn report_outcome<S: StepStore + ?Sized>(
    store: &S,
    step_id: i64,
    outcome: StepState,
) -> Result<WriteOutcome> {
    if !outcome.is_terminal() {
        return Err(StepflowError::Other(anyhow!(
            "worker outcome must be DONE or FAILED, got {outcome}"
        )));
    }

    let update = ConditionalUpdate::for_step(step_id)
        .set_state(outcome)
        .set_handled(false)
        .clear_process_id()
        .expect_state(StepState::Running);

    store.apply(&update)
}
