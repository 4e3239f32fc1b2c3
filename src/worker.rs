// src/worker.rs

//! `stepflow wrap`: the default worker launched for each runnable step.
//!
//! Registers its own pid on the claimed step, runs the step's invoker (or
//! skips it in `test` mode), then reports the outcome straight to the store.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::admin::{register_worker, report_outcome};
use crate::cli::WrapArgs;
use crate::store::{SqliteStepStore, StepStore, WriteOutcome};
use crate::types::{RunMode, StepState};

/// Run one step to completion and record DONE or FAILED.
///
/// A lost write means the controller (or an operator) already moved the
/// step; that is reported as a warning, not an error.
pub async fn run_wrapper(args: WrapArgs) -> Result<StepState> {
    let store = SqliteStepStore::open(&args.database)
        .with_context(|| format!("opening store {}", args.database.display()))?;
    let record = store
        .find_step(args.run_id, &args.step)
        .with_context(|| format!("looking up step '{}' in run {}", args.step, args.run_id))?;

    let pid = std::process::id();
    match register_worker(&store, record.step_id, pid)? {
        WriteOutcome::Applied => debug!(step = %args.step, pid, "worker pid registered"),
        WriteOutcome::Lost => debug!(step = %args.step, pid, "worker pid already recorded"),
    }

    let outcome = match args.mode {
        RunMode::Test => {
            info!(step = %args.step, "test mode; invoker not executed");
            StepState::Done
        }
        RunMode::Run => run_invoker(&args).await,
    };

    match report_outcome(&store, record.step_id, outcome)? {
        WriteOutcome::Applied => {
            info!(step = %args.step, state = %outcome, "outcome recorded");
        }
        WriteOutcome::Lost => {
            warn!(step = %args.step, state = %outcome, "step is no longer RUNNING; outcome discarded");
        }
    }
    Ok(outcome)
}

async fn run_invoker(args: &WrapArgs) -> StepState {
    match try_run_invoker(args).await {
        Ok(true) => StepState::Done,
        Ok(false) => StepState::Failed,
        Err(err) => {
            warn!(step = %args.step, error = %format!("{err:#}"), "could not run invoker");
            StepState::Failed
        }
    }
}

async fn try_run_invoker(args: &WrapArgs) -> Result<bool> {
    if let Some(dir) = args.err_log.parent() {
        fs::create_dir_all(dir)?;
    }
    let err_log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.err_log)
        .with_context(|| format!("opening {}", args.err_log.display()))?;

    let program = resolve_invoker(&args.home_dir, &args.invoker);
    info!(step = %args.step, program = %program.display(), "running invoker");

    let status = Command::new(&program)
        .args(&args.params)
        .current_dir(&args.home_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(err_log.try_clone()?))
        .stderr(Stdio::from(err_log))
        .status()
        .await
        .with_context(|| format!("spawning {}", program.display()))?;

    if !status.success() {
        warn!(step = %args.step, code = ?status.code(), "invoker exited unsuccessfully");
    }
    Ok(status.success())
}

/// Relative paths (`bin/extract.sh`) resolve against the workflow home; bare
/// names are looked up on `PATH`.
pub fn resolve_invoker(home_dir: &Path, invoker: &str) -> PathBuf {
    let path = Path::new(invoker);
    if path.is_relative() && invoker.contains('/') {
        home_dir.join(path)
    } else {
        path.to_path_buf()
    }
}
