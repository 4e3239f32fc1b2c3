// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::{RunMode, StepState};

/// Command-line arguments for `stepflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stepflow",
    version,
    about = "Drive a DAG of long-running external steps from a persisted state table.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow definition (TOML).
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        default_value = "Stepflow.toml"
    )]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STEPFLOW_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Materialize the run if needed, then drive the controller loop.
    Run {
        /// Perform a single snapshot pass and exit.
        #[arg(long)]
        once: bool,

        /// Ask workers to run in `test` mode instead of `run`.
        #[arg(long)]
        test: bool,

        /// Exit when failed steps leave nothing else that can progress.
        #[arg(long)]
        exit_on_stall: bool,
    },

    /// Materialize the run's steps (idempotent) and print the run id.
    Init,

    /// Print the persisted state of every step.
    Status,

    /// Parse + validate, print the expanded DAG, but don't touch the store.
    Validate,

    /// Exclude a step from dispatch.
    Offline {
        /// Fully qualified step name.
        step: String,
    },

    /// Make an offline step eligible for dispatch again.
    Online {
        /// Fully qualified step name.
        step: String,
    },

    /// Force a step into a given state (operator reset).
    SetState {
        /// Fully qualified step name.
        step: String,
        /// READY, ON_DECK, RUNNING, DONE or FAILED.
        state: StepState,
    },

    /// Worker wrapper launched by the dispatcher for every runnable step.
    ///
    /// No `-h`: a step parameter may be named `h`.
    #[command(hide = true, disable_help_flag = true)]
    Wrap(WrapArgs),
}

/// Positional contract of a dispatched worker invocation.
#[derive(Debug, Clone, clap::Args)]
pub struct WrapArgs {
    pub home_dir: PathBuf,
    pub run_id: i64,
    pub step: String,
    pub invoker: String,
    pub err_log: PathBuf,
    pub mode: RunMode,

    /// Store the step belongs to; set by the dispatcher.
    #[arg(long, env = "STEPFLOW_DATABASE", value_name = "PATH")]
    pub database: PathBuf,

    /// `-name value` pairs forwarded to the invoker.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub params: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
