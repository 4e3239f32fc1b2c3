use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use stepflow::errors::{Result, StepflowError};
use stepflow::exec::{Invocation, Launcher};
use stepflow::probe::ProcessProbe;

/// Process table double: a pid is alive until the test kills it.
#[derive(Debug, Clone, Default)]
pub struct FakeProbe {
    alive: Arc<Mutex<HashSet<u32>>>,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&self, pid: u32) {
        self.alive.lock().unwrap().insert(pid);
    }

    pub fn kill(&self, pid: u32) {
        self.alive.lock().unwrap().remove(&pid);
    }
}

impl ProcessProbe for FakeProbe {
    fn is_alive(&self, pid: u32) -> Result<bool> {
        Ok(self.alive.lock().unwrap().contains(&pid))
    }
}

#[derive(Debug, Default)]
struct LauncherState {
    next_pid: u32,
    fail: bool,
    launched: Vec<(u32, Invocation)>,
}

/// Launcher that records invocations and hands out fake pids, which it marks
/// alive in the linked [`FakeProbe`].
#[derive(Debug, Clone)]
pub struct RecordingLauncher {
    probe: FakeProbe,
    state: Arc<Mutex<LauncherState>>,
}

impl RecordingLauncher {
    pub fn new(probe: FakeProbe) -> Self {
        Self {
            probe,
            state: Arc::new(Mutex::new(LauncherState {
                next_pid: 4000,
                ..Default::default()
            })),
        }
    }

    /// Make every following launch fail until reset.
    pub fn fail_launches(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }

    pub fn launched(&self) -> Vec<Invocation> {
        let state = self.state.lock().unwrap();
        state.launched.iter().map(|(_, inv)| inv.clone()).collect()
    }

    pub fn launched_steps(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.launched.iter().map(|(_, inv)| inv.step.clone()).collect()
    }

    /// Pid of the most recent launch for `step`.
    pub fn pid_of(&self, step: &str) -> Option<u32> {
        let state = self.state.lock().unwrap();
        state
            .launched
            .iter()
            .rev()
            .find(|(_, inv)| inv.step == step)
            .map(|(pid, _)| *pid)
    }
}

impl Launcher for RecordingLauncher {
    fn launch(&self, invocation: &Invocation) -> Result<u32> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(StepflowError::LaunchError(format!(
                "scripted launch failure for '{}'",
                invocation.step
            )));
        }
        state.next_pid += 1;
        let pid = state.next_pid;
        state.launched.push((pid, invocation.clone()));
        self.probe.spawn(pid);
        Ok(pid)
    }
}

/// In-memory sink for the step log.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().unwrap()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }

    pub fn clear(&self) {
        self.bytes.lock().unwrap().clear();
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
