// src/engine/mod.rs

//! Controller loop.
//!
//! The synchronous pass over the step table lives in [`core`]; the async
//! shell that repeats it on a timer and reacts to Ctrl-C is implemented in
//! [`runtime`].

use crate::dag::WorkflowProgress;

/// Options for the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Perform a single pass and exit (`--once`).
    pub once: bool,
    /// Exit once failed steps leave nothing else that can progress.
    pub exit_on_stall: bool,
}

/// Events flowing into the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// The poll interval elapsed; run a pass.
    SnapshotDue,
    /// Graceful shutdown requested (e.g. Ctrl-C). Workers keep running.
    ShutdownRequested,
}

/// What one snapshot pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    /// READY steps promoted to ON_DECK.
    pub promoted: usize,
    /// ON_DECK steps dispatched: workers launched plus synthetic steps
    /// completed.
    pub dispatched: usize,
    /// Workers launched.
    pub launched: usize,
    /// Steps occupying a RUNNING slot at the end of the pass.
    pub running: usize,
    pub progress: WorkflowProgress,
}

pub mod core;
pub mod runtime;

pub use self::core::Controller;
pub use runtime::{Runtime, spawn_ticker};
