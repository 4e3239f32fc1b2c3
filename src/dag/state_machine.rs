// src/dag/state_machine.rs

//! Lifecycle transitions of a single step.
//!
//! ```text
//! READY   -> ON_DECK   all parents DONE, not offline
//! ON_DECK -> RUNNING   dispatcher claims the step for a worker
//! ON_DECK -> DONE      synthetic step, no worker
//! RUNNING -> DONE      reported by the worker
//! RUNNING -> FAILED    worker process is gone
//! ```
//!
//! Every write is a conditional update that re-asserts the prior state. A
//! lost write means another actor moved the step first; the controller
//! leaves its in-memory copy alone and observes the new row next pass.

use tracing::{debug, warn};

use crate::dag::step::{Step, StepKind};
use crate::errors::Result;
use crate::probe::ProcessProbe;
use crate::steplog::StepLog;
use crate::store::{ConditionalUpdate, StepStore, WriteOutcome};
use crate::types::StepState;

/// Borrowed view over the collaborators one step transition needs.
pub struct StepMachine<'a, S: StepStore + ?Sized, P: ProcessProbe + ?Sized> {
    store: &'a S,
    probe: &'a P,
    log: &'a StepLog,
}

impl<'a, S: StepStore + ?Sized, P: ProcessProbe + ?Sized> StepMachine<'a, S, P> {
    pub fn new(store: &'a S, probe: &'a P, log: &'a StepLog) -> Self {
        Self { store, probe, log }
    }

    pub fn log(&self) -> &'a StepLog {
        self.log
    }

    /// Reconcile one step after a fresh read.
    ///
    /// A pid write that failed on an earlier pass is retried first. Handled
    /// RUNNING steps are then checked against the process table. Unhandled
    /// steps get their change logged and acknowledged. Returns whether the
    /// step occupies a RUNNING slot afterwards.
    pub fn handle_changes_since_last_snapshot(&self, step: &mut Step) -> Result<bool> {
        if step.state == StepState::Running && step.process_id.is_none() {
            if let Some(pid) = step.launched_pid() {
                debug!(step = %step.name, pid, "retrying worker pid write");
                self.record_launch(step, pid)?;
            }
        }

        if step.handled {
            if step.state == StepState::Running {
                let alive = match step.process_id.or(step.launched_pid()) {
                    Some(pid) => self.probe.is_alive(pid)?,
                    // Claimed, but no worker was ever recorded.
                    None => false,
                };
                if !alive {
                    self.handle_missing_process(step)?;
                }
            }
        } else {
            self.log_changes(step)?;
            self.set_handled_flag(step)?;
        }

        Ok(step.state == StepState::Running)
    }

    /// Fail a RUNNING step whose worker has disappeared.
    ///
    /// The state is re-read first: a worker that finished between the last
    /// read and the probe has already written its outcome. The write itself
    /// is still guarded by `state = RUNNING`.
    pub fn handle_missing_process(&self, step: &mut Step) -> Result<()> {
        let current = self.store.fetch_state(step.id)?;
        if current != StepState::Running {
            debug!(step = %step.name, state = %current, "worker already reported; skipping crash recovery");
            return Ok(());
        }

        let update = ConditionalUpdate::for_step(step.id)
            .set_state(StepState::Failed)
            .set_handled(true)
            .clear_process_id()
            .expect_state(StepState::Running);

        match self.store.apply(&update)? {
            WriteOutcome::Applied => {
                warn!(step = %step.name, pid = ?step.process_id.or(step.launched_pid()), "worker process is gone; step failed");
                step.state = StepState::Failed;
                step.handled = true;
                step.process_id = None;
                step.acknowledge();
                self.log.record(StepState::Failed.as_str(), "***", &step.name)?;
            }
            WriteOutcome::Lost => {
                debug!(step = %step.name, "crash recovery lost to a concurrent write");
            }
        }
        Ok(())
    }

    /// Promote READY to ON_DECK when every parent is DONE.
    ///
    /// Returns whether the step was promoted.
    pub fn maybe_go_to_on_deck(&self, step: &mut Step, parents_done: bool) -> Result<bool> {
        if step.state != StepState::Ready || step.offline || !parents_done {
            return Ok(false);
        }

        let update = ConditionalUpdate::for_step(step.id)
            .set_state(StepState::OnDeck)
            .set_handled(true)
            .expect_state(StepState::Ready)
            .expect_offline(false);

        if !self.store.apply(&update)?.is_applied() {
            debug!(step = %step.name, "promotion to ON_DECK lost to a concurrent write");
            return Ok(false);
        }

        step.state = StepState::OnDeck;
        step.handled = true;
        step.acknowledge();
        self.log.record(StepState::OnDeck.as_str(), "", &step.name)?;
        Ok(true)
    }

    /// Complete a dispatched synthetic step.
    pub fn go_to_done(&self, step: &mut Step) -> Result<WriteOutcome> {
        let note = match &step.kind {
            StepKind::Synthetic(role) => role.completion_note(),
            StepKind::Runnable { .. } => "",
        };

        let update = ConditionalUpdate::for_step(step.id)
            .set_state(StepState::Done)
            .set_handled(true)
            .clear_process_id()
            .expect_state(StepState::OnDeck)
            .expect_offline(false);

        let outcome = self.store.apply(&update)?;
        if outcome.is_applied() {
            step.state = StepState::Done;
            step.handled = true;
            step.process_id = None;
            step.acknowledge();
            self.log.record(StepState::Done.as_str(), note, &step.name)?;
        } else {
            debug!(step = %step.name, "synthetic completion lost to a concurrent write");
        }
        Ok(outcome)
    }

    /// Claim an ON_DECK step for a worker before launching it.
    ///
    /// The claim leaves the row unhandled so the next pass logs RUNNING, and
    /// leaves `process_id` empty until [`Self::record_launch`].
    pub fn acquire(&self, step: &mut Step) -> Result<WriteOutcome> {
        let update = ConditionalUpdate::for_step(step.id)
            .set_state(StepState::Running)
            .set_handled(false)
            .clear_process_id()
            .expect_state(StepState::OnDeck)
            .expect_offline(false);

        let outcome = self.store.apply(&update)?;
        if outcome.is_applied() {
            step.state = StepState::Running;
            step.handled = false;
            step.process_id = None;
        }
        Ok(outcome)
    }

    /// Attach the launched worker's pid to a claimed step.
    ///
    /// `Lost` also covers a worker that registered itself first.
    pub fn record_launch(&self, step: &mut Step, pid: u32) -> Result<WriteOutcome> {
        let update = ConditionalUpdate::for_step(step.id)
            .set_process_id(pid)
            .expect_state(StepState::Running)
            .expect_no_process();

        let outcome = self.store.apply(&update)?;
        if outcome.is_applied() {
            step.process_id = Some(pid);
        }
        Ok(outcome)
    }

    /// Undo a claim whose launch failed; the step is retried next pass.
    pub fn release(&self, step: &mut Step) -> Result<WriteOutcome> {
        let update = ConditionalUpdate::for_step(step.id)
            .set_state(StepState::OnDeck)
            .set_handled(true)
            .expect_state(StepState::Running)
            .expect_no_process();

        let outcome = self.store.apply(&update)?;
        if outcome.is_applied() {
            step.state = StepState::OnDeck;
            step.handled = true;
        }
        Ok(outcome)
    }

    fn log_changes(&self, step: &mut Step) -> Result<()> {
        let previous = step.acknowledged();

        if previous.is_none_or(|(state, _)| state != step.state) {
            let note = if step.state == StepState::Failed { "***" } else { "" };
            self.log.record(step.state.as_str(), note, &step.name)?;
        }

        let offline_changed = match previous {
            Some((_, offline)) => offline != step.offline,
            None => step.offline,
        };
        if offline_changed {
            let note = if step.offline { "OFFLINE" } else { "ONLINE" };
            self.log.record("", note, &step.name)?;
        }

        step.acknowledge();
        Ok(())
    }

    fn set_handled_flag(&self, step: &mut Step) -> Result<()> {
        let update = ConditionalUpdate::for_step(step.id)
            .set_handled(true)
            .expect_state(step.state)
            .expect_offline(step.offline);

        match self.store.apply(&update)? {
            WriteOutcome::Applied => step.handled = true,
            WriteOutcome::Lost => {
                debug!(step = %step.name, "acknowledgment lost; step changed again");
            }
        }
        Ok(())
    }
}
