// src/exec/dispatcher.rs

use tracing::{debug, error, info};

use crate::dag::{Step, StepKind, StepMachine};
use crate::errors::Result;
use crate::exec::invocation::{DispatchSettings, Invocation};
use crate::exec::launcher::Launcher;
use crate::probe::ProcessProbe;
use crate::store::StepStore;
use crate::types::StepState;

/// Turns ON_DECK steps into running workers (or completed synthetic steps).
pub struct Dispatcher<'a, L: Launcher + ?Sized> {
    settings: &'a DispatchSettings,
    launcher: &'a L,
}

impl<'a, L: Launcher + ?Sized> Dispatcher<'a, L> {
    pub fn new(settings: &'a DispatchSettings, launcher: &'a L) -> Self {
        Self { settings, launcher }
    }

    /// Dispatch one step if it is ON_DECK and online.
    ///
    /// Returns the number of steps dispatched (0 or 1). Synthetic steps count
    /// once they complete in place; they launch nothing.
    ///
    /// A runnable step is claimed (ON_DECK to RUNNING) before anything is
    /// started, so a lost claim never produces a second worker. If the launch
    /// fails the claim is released and the error is returned; the step stays
    /// ON_DECK for the next pass.
    pub fn run_on_deck_step<S, P>(
        &self,
        machine: &StepMachine<'_, S, P>,
        step: &mut Step,
    ) -> Result<usize>
    where
        S: StepStore + ?Sized,
        P: ProcessProbe + ?Sized,
    {
        if step.state != StepState::OnDeck || step.offline {
            return Ok(0);
        }

        let invoker = match &step.kind {
            StepKind::Synthetic(_) => {
                let outcome = machine.go_to_done(step)?;
                return Ok(usize::from(outcome.is_applied()));
            }
            StepKind::Runnable { invoker } => invoker.clone(),
        };

        if !machine.acquire(step)?.is_applied() {
            debug!(step = %step.name, "claim lost to a concurrent write; not launching");
            return Ok(0);
        }

        let invocation = Invocation::for_step(self.settings, step, &invoker);
        let pid = match self.launcher.launch(&invocation) {
            Ok(pid) => pid,
            Err(err) => {
                if let Err(release_err) = machine.release(step) {
                    error!(step = %step.name, error = %release_err, "failed to release claim after launch failure");
                }
                return Err(err);
            }
        };

        step.note_launch(pid);
        machine.log().record("Invoked", "", &step.name)?;
        info!(step = %step.name, pid, cmd = %invocation.command_line(), "worker invoked");

        // A failed write here is retried on the next pass from `launched_pid`.
        if !machine.record_launch(step, pid)?.is_applied() {
            debug!(step = %step.name, pid, "pid already registered by the worker or step moved");
        }
        Ok(1)
    }
}
