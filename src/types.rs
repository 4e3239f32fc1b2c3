// src/types.rs

//! Small shared value types: the persisted step state and the worker mode.

use std::fmt;
use std::str::FromStr;

/// Persisted lifecycle state of a step.
///
/// Advancing edges:
///
/// ```text
/// READY -> ON_DECK -> RUNNING -> DONE
///                  \-> DONE (synthetic steps)
///                     RUNNING -> FAILED (process vanished)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StepState {
    Ready,
    OnDeck,
    Running,
    Done,
    Failed,
}

impl StepState {
    pub const ALL: [StepState; 5] = [
        StepState::Ready,
        StepState::OnDeck,
        StepState::Running,
        StepState::Done,
        StepState::Failed,
    ];

    /// Column value used in the `state` column and in step log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            StepState::Ready => "READY",
            StepState::OnDeck => "ON_DECK",
            StepState::Running => "RUNNING",
            StepState::Done => "DONE",
            StepState::Failed => "FAILED",
        }
    }

    /// DONE and FAILED are terminal as far as the controller is concerned.
    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Done | StepState::Failed)
    }

    /// Whether `self -> next` is one of the lifecycle edges.
    ///
    /// Operator resets (e.g. FAILED back to READY) are not lifecycle edges;
    /// they are external writes the controller merely observes.
    pub fn can_advance_to(self, next: StepState) -> bool {
        matches!(
            (self, next),
            (StepState::Ready, StepState::OnDeck)
                | (StepState::OnDeck, StepState::Running)
                | (StepState::OnDeck, StepState::Done)
                | (StepState::Running, StepState::Done)
                | (StepState::Running, StepState::Failed)
        )
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StepState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "READY" => Ok(StepState::Ready),
            "ON_DECK" => Ok(StepState::OnDeck),
            "RUNNING" => Ok(StepState::Running),
            "DONE" => Ok(StepState::Done),
            "FAILED" => Ok(StepState::Failed),
            other => Err(format!(
                "invalid step state: {other} (expected READY, ON_DECK, RUNNING, DONE or FAILED)"
            )),
        }
    }
}

/// Mode flag handed to every worker invocation.
///
/// `Test` asks the worker to go through the motions without doing the real
/// work (the `test` positional argument); `Run` is a normal execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    Test,
    #[default]
    Run,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Test => "test",
            RunMode::Run => "run",
        }
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "test" => Ok(RunMode::Test),
            "run" => Ok(RunMode::Run),
            other => Err(format!(
                "invalid worker mode: {other} (expected \"test\" or \"run\")"
            )),
        }
    }
}
