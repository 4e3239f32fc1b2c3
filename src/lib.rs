// src/lib.rs

pub mod admin;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod probe;
pub mod steplog;
pub mod store;
pub mod types;
pub mod worker;

use std::path::Path;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::{CliArgs, Command};
use crate::config::{WorkflowFile, load_and_validate};
use crate::dag::{StepKind, SyntheticRole, WorkflowGraph, WorkflowProgress};
use crate::engine::{Controller, Runtime, RuntimeEvent, RuntimeOptions, spawn_ticker};
use crate::exec::DetachedLauncher;
use crate::probe::OsProcessProbe;
use crate::steplog::StepLog;
use crate::store::{SqliteStepStore, StepStore, WriteOutcome};
use crate::types::RunMode;

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let command = args.command.clone();
    match command {
        Command::Wrap(wrap) => {
            worker::run_wrapper(wrap).await?;
            Ok(())
        }
        Command::Validate => {
            let file = load_and_validate(&args.config)?;
            print_definition(&file);
            Ok(())
        }
        Command::Run {
            once,
            test,
            exit_on_stall,
        } => {
            let file = load_and_validate(&args.config)?;
            let mode = if test { RunMode::Test } else { RunMode::Run };
            run_controller(&file, mode, once, exit_on_stall).await
        }
        Command::Init => {
            let file = load_and_validate(&args.config)?;
            let store = open_store(&file)?;
            let run_id = store.materialize(
                &file.workflow.name,
                &file.workflow.home_dir,
                &file.step_names(),
            )?;
            println!("{run_id}");
            Ok(())
        }
        Command::Status => {
            let file = load_and_validate(&args.config)?;
            let store = open_store(&file)?;
            print_status(&file, &store)
        }
        Command::Offline { step } => {
            let (store, run_id) = open_run(&args.config)?;
            let outcome = admin::set_offline(&store, run_id, &step, true)?;
            report(&step, outcome, "offline");
            Ok(())
        }
        Command::Online { step } => {
            let (store, run_id) = open_run(&args.config)?;
            let outcome = admin::set_offline(&store, run_id, &step, false)?;
            report(&step, outcome, "online");
            Ok(())
        }
        Command::SetState { step, state } => {
            let (store, run_id) = open_run(&args.config)?;
            let outcome = admin::force_state(&store, run_id, &step, state)?;
            report(&step, outcome, state.as_str());
            Ok(())
        }
    }
}

/// Wire the controller to the real store, probe and launcher and drive it
/// until the run completes, stalls (with `exit_on_stall`), or Ctrl-C.
async fn run_controller(
    file: &WorkflowFile,
    mode: RunMode,
    once: bool,
    exit_on_stall: bool,
) -> Result<()> {
    let settings = &file.workflow;
    let store = open_store(file)?;
    let log = StepLog::open(settings.step_log_path())
        .with_context(|| format!("opening step log {}", settings.step_log_path().display()))?;

    let controller = Controller::for_workflow(
        file,
        store,
        OsProcessProbe,
        DetachedLauncher,
        log,
        mode,
    )?;

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let _ticker = if once {
        rt_tx.send(RuntimeEvent::SnapshotDue).await?;
        None
    } else {
        Some(spawn_ticker(rt_tx.clone(), settings.poll_interval))
    };

    let options = RuntimeOptions {
        once,
        exit_on_stall,
    };

    let runtime = Runtime::new(controller, rt_rx, options);
    let progress = runtime.run().await?;
    debug!(?progress, "controller stopped");

    match progress {
        Some(WorkflowProgress::Complete { failed }) if failed > 0 => {
            bail!("workflow finished with {failed} failed step(s)")
        }
        Some(WorkflowProgress::Stalled { blocked }) if exit_on_stall => {
            bail!("workflow stalled: {blocked} step(s) blocked by failed steps")
        }
        _ => Ok(()),
    }
}

fn open_store(file: &WorkflowFile) -> Result<SqliteStepStore> {
    let path = &file.workflow.database;
    SqliteStepStore::open(path).with_context(|| format!("opening store {}", path.display()))
}

/// Store plus the id of an already materialized run.
fn open_run(config: &Path) -> Result<(SqliteStepStore, i64)> {
    let file = load_and_validate(config)?;
    let store = open_store(&file)?;
    let run_id = store
        .find_run(&file.workflow.name)?
        .with_context(|| format!("workflow '{}' has not been initialized", file.workflow.name))?;
    Ok((store, run_id))
}

fn report(step: &str, outcome: WriteOutcome, what: &str) {
    match outcome {
        WriteOutcome::Applied => {
            info!(step, what, "updated");
            println!("{step}: {what}");
        }
        WriteOutcome::Lost => println!("{step}: unchanged (already {what} or changed concurrently)"),
    }
}

fn print_status(file: &WorkflowFile, store: &SqliteStepStore) -> Result<()> {
    let Some(run_id) = store.find_run(&file.workflow.name)? else {
        println!("workflow '{}' has not been initialized", file.workflow.name);
        return Ok(());
    };

    let records = store.load_steps(run_id)?;
    println!("workflow {} (run {run_id})", file.workflow.name);
    for def in file.steps.iter() {
        let Some(record) = records.iter().find(|r| r.name == def.name) else {
            println!("  {:<8} {:<8} {}", "?", "", def.name);
            continue;
        };
        let flag = if record.offline { "OFFLINE" } else { "" };
        match record.process_id {
            Some(pid) => println!("  {:<8} {:<8} {} (pid {pid})", record.state, flag, record.name),
            None => println!("  {:<8} {:<8} {}", record.state, flag, record.name),
        }
    }

    // Steps added to the definition since `init` have no row yet.
    match WorkflowGraph::build(&file.steps, records) {
        Ok(graph) => {
            let counts: Vec<String> = graph
                .state_counts()
                .iter()
                .map(|(state, n)| format!("{state}={n}"))
                .collect();
            println!("totals: {}", counts.join(" "));
            println!("progress: {:?}", graph.progress());
        }
        Err(err) => debug!(error = %err, "skipping totals for a partially materialized run"),
    }
    Ok(())
}

/// Print the expanded DAG without touching the store.
fn print_definition(file: &WorkflowFile) {
    let settings = &file.workflow;
    println!("stepflow validate");
    println!("  workflow.name = {}", settings.name);
    println!("  workflow.home_dir = {}", settings.home_dir.display());
    println!("  workflow.database = {}", settings.database.display());
    println!("  workflow.poll_interval = {:?}", settings.poll_interval);
    if let Some(max) = settings.max_running {
        println!("  workflow.max_running = {max}");
    }
    println!();

    println!("steps ({}):", file.steps.len());
    for step in file.steps.iter() {
        println!("  - {}", step.name);
        match &step.kind {
            StepKind::Runnable { invoker } => println!("      invoker: {invoker}"),
            StepKind::Synthetic(SyntheticRole::Marker) => println!("      synthetic"),
            StepKind::Synthetic(SyntheticRole::SubgraphCall) => println!("      subgraph call"),
            StepKind::Synthetic(SyntheticRole::SubgraphReturn) => println!("      subgraph return"),
        }
        if !step.depends_on.is_empty() {
            println!("      depends_on: {:?}", step.depends_on);
        }
        for (name, value) in step.params.iter() {
            println!("      -{name} {value:?}");
        }
    }
}
