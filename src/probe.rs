// src/probe.rs

//! Process liveness probe.
//!
//! The controller never waits on a worker; it only asks whether the worker's
//! process still exists. The answer is authoritative for reconciliation, even
//! though it can lag behind process-table cleanup.

use crate::errors::{Result, StepflowError};

/// Answers "is there a live process with this id?".
pub trait ProcessProbe {
    fn is_alive(&self, pid: u32) -> Result<bool>;
}

/// Probe backed by the operating system's process table (signal 0).
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessProbe;

#[cfg(unix)]
impl ProcessProbe for OsProcessProbe {
    fn is_alive(&self, pid: u32) -> Result<bool> {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // 0 and negative values address process groups, not a single process.
        let raw = i32::try_from(pid)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| StepflowError::ProbeError(format!("invalid process id {pid}")))?;

        match kill(Pid::from_raw(raw), None) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            // Exists, but belongs to someone else.
            Err(Errno::EPERM) => Ok(true),
            Err(e) => Err(StepflowError::ProbeError(format!(
                "probing process {pid}: {e}"
            ))),
        }
    }
}

#[cfg(not(unix))]
impl ProcessProbe for OsProcessProbe {
    fn is_alive(&self, pid: u32) -> Result<bool> {
        Err(StepflowError::ProbeError(format!(
            "cannot probe process {pid}: process probing is only supported on unix"
        )))
    }
}
