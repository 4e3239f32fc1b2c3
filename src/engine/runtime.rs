// src/engine/runtime.rs

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::dag::WorkflowProgress;
use crate::errors::Result;
use crate::exec::Launcher;
use crate::probe::ProcessProbe;
use crate::store::StepStore;

use super::core::Controller;
use super::{RuntimeEvent, RuntimeOptions};

/// Async shell around [`Controller`]: waits for events and runs passes.
///
/// Shutting down stops the loop only. Workers are detached and keep running;
/// the next controller start reconciles them.
pub struct Runtime<S, P, L> {
    controller: Controller<S, P, L>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    options: RuntimeOptions,
}

impl<S, P, L> fmt::Debug for Runtime<S, P, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("controller", &self.controller)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<S: StepStore, P: ProcessProbe, L: Launcher> Runtime<S, P, L> {
    pub fn new(
        controller: Controller<S, P, L>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            controller,
            event_rx,
            options,
        }
    }

    /// Main event loop.
    ///
    /// Returns the progress seen by the last successful pass, if any. A
    /// failed pass is logged and retried on the next tick, except with
    /// `once`, where the error is returned.
    pub async fn run(mut self) -> Result<Option<WorkflowProgress>> {
        info!(run_id = self.controller.run_id(), "stepflow runtime started");
        let mut last = None;

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            match event {
                RuntimeEvent::ShutdownRequested => {
                    info!("shutdown requested; leaving workers running");
                    break;
                }
                RuntimeEvent::SnapshotDue => match self.controller.snapshot() {
                    Ok(report) => {
                        last = Some(report.progress);
                        if self.should_stop(report.progress) {
                            break;
                        }
                    }
                    Err(err) if self.options.once => return Err(err),
                    Err(err) => {
                        error!(error = %err, "snapshot pass failed; retrying next interval");
                    }
                },
            }

            if self.options.once {
                break;
            }
        }

        info!("runtime exiting");
        Ok(last)
    }

    fn should_stop(&self, progress: WorkflowProgress) -> bool {
        match progress {
            WorkflowProgress::Complete { failed } => {
                info!(failed, "every step reached DONE or FAILED");
                true
            }
            WorkflowProgress::Stalled { blocked } if self.options.exit_on_stall => {
                warn!(blocked, "remaining steps are blocked by failed steps");
                true
            }
            _ => false,
        }
    }
}

/// Send `SnapshotDue` every `period`, starting immediately.
///
/// Stops when the receiving runtime goes away.
pub fn spawn_ticker(tx: mpsc::Sender<RuntimeEvent>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if tx.send(RuntimeEvent::SnapshotDue).await.is_err() {
                break;
            }
        }
    })
}
