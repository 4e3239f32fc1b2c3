// src/engine/core.rs

//! One snapshot pass over the step table.
//!
//! The controller is synchronous: store reads and writes, the process probe
//! and the launcher are all short, bounded calls that never wait on a worker.
//! It holds no channels and can be driven directly from tests.

use std::fmt;

use tracing::{debug, info};

use crate::config::WorkflowFile;
use crate::dag::{StepMachine, WorkflowGraph};
use crate::engine::PassReport;
use crate::errors::Result;
use crate::exec::{DispatchSettings, Dispatcher, Launcher};
use crate::probe::ProcessProbe;
use crate::steplog::StepLog;
use crate::store::StepStore;
use crate::types::{RunMode, StepState};

/// Owns the in-memory graph of one run and its collaborators.
pub struct Controller<S, P, L> {
    store: S,
    probe: P,
    launcher: L,
    log: StepLog,
    graph: WorkflowGraph,
    run_id: i64,
    dispatch: DispatchSettings,
    max_running: Option<usize>,
}

impl<S, P, L> fmt::Debug for Controller<S, P, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("run_id", &self.run_id)
            .field("steps", &self.graph.len())
            .field("max_running", &self.max_running)
            .finish_non_exhaustive()
    }
}

impl<S: StepStore, P: ProcessProbe, L: Launcher> Controller<S, P, L> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: S,
        probe: P,
        launcher: L,
        log: StepLog,
        graph: WorkflowGraph,
        run_id: i64,
        dispatch: DispatchSettings,
        max_running: Option<usize>,
    ) -> Self {
        Self {
            store,
            probe,
            launcher,
            log,
            graph,
            run_id,
            dispatch,
            max_running,
        }
    }

    /// Materialize the run (if needed) and build the controller for it.
    pub fn for_workflow(
        file: &WorkflowFile,
        store: S,
        probe: P,
        launcher: L,
        log: StepLog,
        mode: RunMode,
    ) -> Result<Self> {
        let settings = &file.workflow;
        let run_id = store.materialize(&settings.name, &settings.home_dir, &file.step_names())?;
        let records = store.load_steps(run_id)?;
        let graph = WorkflowGraph::build(&file.steps, records)?;
        let dispatch = DispatchSettings::from_workflow(settings, run_id, mode)?;

        info!(
            workflow = %settings.name,
            run_id,
            steps = graph.len(),
            mode = mode.as_str(),
            "controller ready"
        );

        Ok(Self::new(
            store,
            probe,
            launcher,
            log,
            graph,
            run_id,
            dispatch,
            settings.max_running,
        ))
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Run one pass: re-read every row, then for each step in dependency
    /// order reconcile it, check readiness, and dispatch it.
    ///
    /// Any store, probe or launch error aborts the pass; the next pass starts
    /// again from a fresh read.
    pub fn snapshot(&mut self) -> Result<PassReport> {
        let records = self.store.load_steps(self.run_id)?;
        self.graph.refresh(records)?;

        let machine = StepMachine::new(&self.store, &self.probe, &self.log);
        let dispatcher = Dispatcher::new(&self.dispatch, &self.launcher);

        let mut running = self
            .graph
            .steps()
            .filter(|s| s.state == StepState::Running)
            .count();
        let mut promoted = 0;
        let mut dispatched = 0;
        let mut launched = 0;

        for idx in 0..self.graph.len() {
            let step = self.graph.step_mut(idx);
            let was_running = step.state == StepState::Running;
            let occupies = machine.handle_changes_since_last_snapshot(step)?;
            if was_running && !occupies {
                running -= 1;
            }

            let parents_done = self.graph.parents_done(idx);
            let step = self.graph.step_mut(idx);
            if machine.maybe_go_to_on_deck(step, parents_done)? {
                promoted += 1;
            }

            if step.kind.is_runnable() && self.max_running.is_some_and(|max| running >= max) {
                if step.state == StepState::OnDeck {
                    debug!(step = %step.name, running, "running limit reached; leaving step on deck");
                }
                continue;
            }

            let n = dispatcher.run_on_deck_step(&machine, step)?;
            dispatched += n;
            if step.kind.is_runnable() {
                launched += n;
                running += n;
            }
        }

        let report = PassReport {
            promoted,
            dispatched,
            launched,
            running,
            progress: self.graph.progress(),
        };
        debug!(?report, "snapshot pass complete");
        Ok(report)
    }
}
