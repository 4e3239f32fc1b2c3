// src/exec/launcher.rs

//! Starting worker processes.
//!
//! The controller never waits for a worker. It only needs the pid, which it
//! records so later passes can probe for liveness.

use std::fs::{self, OpenOptions};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::errors::{Result, StepflowError};
use crate::exec::invocation::Invocation;

/// Starts a worker for an invocation and returns its pid.
///
/// Production code uses [`DetachedLauncher`]; tests provide implementations
/// that record invocations without spawning anything.
pub trait Launcher {
    fn launch(&self, invocation: &Invocation) -> Result<u32>;
}

/// Launches workers that outlive the controller.
///
/// On unix each worker starts a new session (and with it a new process
/// group), so neither a Ctrl-C aimed at the controller nor the loss of its
/// terminal reaches the worker. stdin and stdout are closed; stderr is
/// appended to the step's error log. The child handle is dropped immediately
/// and tokio reaps the process when it exits.
///
/// Must be called from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedLauncher;

impl Launcher for DetachedLauncher {
    fn launch(&self, invocation: &Invocation) -> Result<u32> {
        if let Some(dir) = invocation.err_log.parent() {
            fs::create_dir_all(dir)?;
        }
        let err_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&invocation.err_log)?;

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&invocation.current_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(err_log))
            .kill_on_drop(false);

        #[cfg(unix)]
        // SAFETY: setsid is async-signal-safe and only affects the child.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid()?;
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| {
            StepflowError::LaunchError(format!(
                "spawning worker '{}' for step '{}': {e}",
                invocation.program.display(),
                invocation.step
            ))
        })?;

        let pid = child.id().ok_or_else(|| {
            StepflowError::LaunchError(format!(
                "worker for step '{}' exited before its pid was read",
                invocation.step
            ))
        })?;

        debug!(step = %invocation.step, pid, "worker detached");
        drop(child);
        Ok(pid)
    }
}
