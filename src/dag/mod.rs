// src/dag/mod.rs

//! Step DAG and the per-step state machine.
//!
//! - [`step`] holds a single step: its static definition plus the persisted
//!   state mirrored from the store.
//! - [`graph`] holds all steps of a run in dependency order with parent and
//!   child edges.
//! - [`state_machine`] reconciles a step against the process table and
//!   advances it through its lifecycle with conditional writes.

pub mod graph;
pub mod state_machine;
pub mod step;

pub use graph::{WorkflowGraph, WorkflowProgress};
pub use state_machine::StepMachine;
pub use step::{Step, StepKind, SyntheticRole};
