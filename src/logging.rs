// src/logging.rs

//! Diagnostic logging for the `stepflow` binary.
//!
//! There are two logs. This module configures the `tracing` subscriber for
//! diagnostics: controller decisions, lost writes and launch failures. The
//! operator-facing record of step transitions is the step log in
//! [`crate::steplog`], which is written directly and never filtered.
//!
//! Diagnostics always go to STDERR. For a controller that is the terminal;
//! for a `wrap` worker it is the step's error log, since the launcher points
//! the worker's stderr there.
//!
//! Level: `--log-level`, else `STEPFLOW_LOG`, else `info`.

use std::str::FromStr;

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "STEPFLOW_LOG";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env_level = std::env::var(LOG_ENV).ok();
    let level = resolve_level(cli_level, env_level.as_deref());

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn resolve_level(cli_level: Option<LogLevel>, env_level: Option<&str>) -> Level {
    if let Some(lvl) = cli_level {
        return lvl.into();
    }
    env_level
        .map(|s| if s.trim().eq_ignore_ascii_case("warning") { "warn" } else { s.trim() })
        .and_then(|s| Level::from_str(s).ok())
        .unwrap_or(Level::INFO)
}

impl From<LogLevel> for Level {
    fn from(lvl: LogLevel) -> Self {
        match lvl {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}
