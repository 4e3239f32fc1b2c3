// src/dag/step.rs

//! A single step of a workflow run.

use std::collections::BTreeMap;

use crate::config::StepDefinition;
use crate::store::StepRecord;
use crate::types::StepState;

/// What happens when a step is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Work performed by an external worker process.
    Runnable { invoker: String },
    /// Control-flow node with no external work; completes as soon as it is
    /// dispatched.
    Synthetic(SyntheticRole),
}

/// Why a synthetic step exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticRole {
    /// Plain join point declared without an invoker.
    Marker,
    /// Entry into a nested sub-graph.
    SubgraphCall,
    /// Exit from a nested sub-graph.
    SubgraphReturn,
}

impl SyntheticRole {
    /// Annotation column used when the step completes.
    pub fn completion_note(self) -> &'static str {
        match self {
            SyntheticRole::SubgraphCall => "(call)",
            SyntheticRole::Marker | SyntheticRole::SubgraphReturn => "",
        }
    }
}

impl StepKind {
    pub fn invoker(&self) -> Option<&str> {
        match self {
            StepKind::Runnable { invoker } => Some(invoker),
            StepKind::Synthetic(_) => None,
        }
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self, StepKind::Runnable { .. })
    }
}

/// Static definition plus the controller's copy of the persisted row.
#[derive(Debug, Clone)]
pub struct Step {
    pub id: i64,
    pub name: String,
    pub kind: StepKind,
    pub params: BTreeMap<String, String>,

    pub state: StepState,
    pub handled: bool,
    pub offline: bool,
    pub process_id: Option<u32>,

    pub(crate) parents: Vec<usize>,
    pub(crate) children: Vec<usize>,

    /// Last state/offline pair the controller logged and acknowledged.
    /// `None` until the first acknowledgment seen by this controller.
    acknowledged: Option<(StepState, bool)>,

    /// Pid this controller launched for the current claim, kept until the
    /// store holds it or the step leaves RUNNING.
    launched_pid: Option<u32>,
}

impl Step {
    pub fn new(def: &StepDefinition, record: &StepRecord) -> Self {
        let mut step = Self {
            id: record.step_id,
            name: def.name.clone(),
            kind: def.kind.clone(),
            params: def.params.clone(),
            state: record.state,
            handled: record.handled,
            offline: record.offline,
            process_id: record.process_id,
            parents: Vec::new(),
            children: Vec::new(),
            acknowledged: None,
            launched_pid: None,
        };
        step.apply_record(record);
        step
    }

    /// Mirror a freshly read row.
    ///
    /// A handled row means someone already acknowledged its state, so it
    /// becomes the baseline for the next change.
    pub fn apply_record(&mut self, record: &StepRecord) {
        self.id = record.step_id;
        self.state = record.state;
        self.handled = record.handled;
        self.offline = record.offline;
        self.process_id = record.process_id;
        if record.handled {
            self.acknowledged = Some((record.state, record.offline));
        }
        if record.state != StepState::Running || record.process_id.is_some() {
            self.launched_pid = None;
        }
    }

    pub fn acknowledged(&self) -> Option<(StepState, bool)> {
        self.acknowledged
    }

    /// Record that the current state/offline pair has been logged.
    /// Does not touch `handled`; that flag mirrors the store.
    pub(crate) fn acknowledge(&mut self) {
        self.acknowledged = Some((self.state, self.offline));
    }

    pub fn launched_pid(&self) -> Option<u32> {
        self.launched_pid
    }

    pub(crate) fn note_launch(&mut self, pid: u32) {
        self.launched_pid = Some(pid);
    }

    pub fn parents(&self) -> &[usize] {
        &self.parents
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }
}
