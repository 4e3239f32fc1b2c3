// src/steplog.rs

//! Append-only step log.
//!
//! One line per observed transition or acknowledgment:
//!
//! ```text
//! ON_DECK           extract
//! Invoked           extract
//!          OFFLINE  load.parse
//! FAILED   ***      extract
//! ```
//!
//! Each line is also mirrored through `tracing` at `info` level.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use tracing::info;

use crate::errors::{Result, StepflowError};

/// Format a step log line: two fixed-width columns and the step name.
pub fn format_line(label: &str, note: &str, step: &str) -> String {
    format!("{label:<8} {note:<8} {step}")
}

pub struct StepLog {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for StepLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepLog").finish_non_exhaustive()
    }
}

impl StepLog {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_writer(file))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Mutex::new(Box::new(writer)),
        }
    }

    /// Append one line for `step`.
    pub fn record(&self, label: &str, note: &str, step: &str) -> Result<()> {
        let line = format_line(label, note, step);
        info!(target: "stepflow::steplog", "{}", line.trim_end());

        let mut sink = self
            .sink
            .lock()
            .map_err(|_| StepflowError::Other(anyhow::anyhow!("step log lock poisoned")))?;
        writeln!(sink, "{line}")?;
        sink.flush()?;
        Ok(())
    }
}
