// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::config::StepDefinition;
use crate::dag::step::Step;
use crate::errors::{Result, StepflowError};
use crate::store::StepRecord;
use crate::types::StepState;

/// Overall state of a run after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowProgress {
    /// Something is running, dispatchable, or waiting on parents that can
    /// still complete.
    Active,
    /// Every step is DONE or FAILED.
    Complete { failed: usize },
    /// Nothing is running or on deck and every waiting step sits below a
    /// FAILED step. Only an operator reset can move the run forward.
    Stalled { blocked: usize },
}

/// All steps of one run, stored in dependency order.
///
/// Index `i` only ever has parents with an index lower than `i`, so walking
/// the steps front to back visits parents before children.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    steps: Vec<Step>,
    by_name: HashMap<String, usize>,
}

impl WorkflowGraph {
    /// Build the graph from ordered definitions and their persisted rows.
    ///
    /// Assumes `defs` comes from a validated [`crate::config::WorkflowFile`]
    /// (dependencies first, no cycles).
    pub fn build(defs: &[StepDefinition], records: Vec<StepRecord>) -> Result<Self> {
        let records: HashMap<String, StepRecord> =
            records.into_iter().map(|r| (r.name.clone(), r)).collect();

        let mut steps = Vec::with_capacity(defs.len());
        let mut by_name = HashMap::with_capacity(defs.len());

        for (idx, def) in defs.iter().enumerate() {
            let record = records
                .get(&def.name)
                .ok_or_else(|| StepflowError::StepNotFound(def.name.clone()))?;
            steps.push(Step::new(def, record));
            by_name.insert(def.name.clone(), idx);
        }

        for (idx, def) in defs.iter().enumerate() {
            for dep in def.depends_on.iter() {
                let parent = *by_name
                    .get(dep)
                    .ok_or_else(|| StepflowError::StepNotFound(dep.clone()))?;
                if parent >= idx {
                    return Err(StepflowError::DagCycle(format!(
                        "step '{}' is ordered before its dependency '{}'",
                        def.name, dep
                    )));
                }
                steps[idx].parents.push(parent);
                steps[parent].children.push(idx);
            }
        }

        Ok(Self { steps, by_name })
    }

    /// Mirror a fresh read of every row.
    pub fn refresh(&mut self, records: Vec<StepRecord>) -> Result<()> {
        let mut seen = 0usize;
        for record in records.iter() {
            match self.by_name.get(&record.name) {
                Some(&idx) => {
                    self.steps[idx].apply_record(record);
                    seen += 1;
                }
                None => {
                    warn!(step = %record.name, "stored step is not part of the definition; ignoring");
                }
            }
        }

        if seen != self.steps.len() {
            let missing = self
                .steps
                .iter()
                .find(|s| !records.iter().any(|r| r.name == s.name))
                .map(|s| s.name.clone())
                .unwrap_or_default();
            return Err(StepflowError::StepNotFound(missing));
        }
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    pub fn step_mut(&mut self, idx: usize) -> &mut Step {
        &mut self.steps[idx]
    }

    /// Whether every parent of `idx` is DONE in the controller's copy.
    pub fn parents_done(&self, idx: usize) -> bool {
        self.steps[idx]
            .parents
            .iter()
            .all(|&p| self.steps[p].state == StepState::Done)
    }

    /// Number of steps in each state, for status summaries.
    pub fn state_counts(&self) -> BTreeMap<StepState, usize> {
        let mut counts = BTreeMap::new();
        for step in self.steps.iter() {
            *counts.entry(step.state).or_insert(0) += 1;
        }
        counts
    }

    pub fn progress(&self) -> WorkflowProgress {
        if self.steps.iter().all(|s| s.state.is_terminal()) {
            let failed = self
                .steps
                .iter()
                .filter(|s| s.state == StepState::Failed)
                .count();
            return WorkflowProgress::Complete { failed };
        }

        if self
            .steps
            .iter()
            .any(|s| matches!(s.state, StepState::OnDeck | StepState::Running))
        {
            return WorkflowProgress::Active;
        }

        // Parents come first, so one forward sweep propagates blockage.
        let mut blocked = vec![false; self.steps.len()];
        for (idx, step) in self.steps.iter().enumerate() {
            blocked[idx] = step.parents.iter().any(|&p| {
                self.steps[p].state == StepState::Failed || blocked[p]
            });
        }

        let waiting: Vec<usize> = self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state == StepState::Ready)
            .map(|(idx, _)| idx)
            .collect();

        if waiting.iter().all(|&idx| blocked[idx]) {
            WorkflowProgress::Stalled {
                blocked: waiting.len(),
            }
        } else {
            WorkflowProgress::Active
        }
    }
}
