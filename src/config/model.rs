// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dag::StepKind;
use crate::errors::{Result, StepflowError};

/// Workflow definition as read from a TOML file.
///
/// ```toml
/// [workflow]
/// name = "genome-build"
/// poll_interval = "5s"
/// max_running = 4
///
/// [step.extract]
/// invoker = "bin/extract.sh"
/// params = { input = "raw/a.txt" }
///
/// [step.load]
/// depends_on = ["extract"]
/// subgraph = "load.toml"
/// ```
///
/// Nested sub-graph files use the same format; only their `[step.*]`
/// sections are read.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkflowFile {
    /// `[workflow]` section; required for the top-level file.
    #[serde(default)]
    pub workflow: Option<WorkflowSection>,

    /// All steps from `[step.<name>]`, keyed by local step name.
    #[serde(default)]
    pub step: BTreeMap<String, StepConfig>,
}

/// `[workflow]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowSection {
    /// Run name; the store keys runs by it.
    pub name: String,

    /// Workflow home directory. Defaults to the directory holding the
    /// definition file.
    #[serde(default)]
    pub home_dir: Option<PathBuf>,

    /// Database file; relative paths resolve under `home_dir`.
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Program launched for every runnable step. Defaults to this executable
    /// running its own `wrap` subcommand.
    #[serde(default)]
    pub wrapper: Option<PathBuf>,

    /// Arguments placed before the positional invocation contract.
    #[serde(default)]
    pub wrapper_args: Option<Vec<String>>,

    /// Time between controller passes, e.g. `"500ms"`, `"5s"`, `"1m"`.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Optional bound on concurrently RUNNING steps.
    #[serde(default)]
    pub max_running: Option<usize>,
}

fn default_poll_interval() -> String {
    "5s".to_string()
}

/// `[step.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepConfig {
    /// Program performing the step's work. Steps without an invoker (and
    /// without a sub-graph) are synthetic join points.
    #[serde(default)]
    pub invoker: Option<String>,

    /// Steps that must be DONE before this one may start.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Parameters passed to the invoker as `-name value` pairs.
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Nested workflow file (relative to this file's directory).
    #[serde(default)]
    pub subgraph: Option<PathBuf>,
}

/// A step after sub-graph expansion, keyed by its fully qualified name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDefinition {
    pub name: String,
    pub kind: StepKind,
    pub depends_on: Vec<String>,
    pub params: BTreeMap<String, String>,
}

/// Resolved `[workflow]` settings.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub name: String,
    pub home_dir: PathBuf,
    pub database: PathBuf,
    pub wrapper: Option<PathBuf>,
    pub wrapper_args: Vec<String>,
    pub poll_interval: Duration,
    pub max_running: Option<usize>,
}

impl WorkflowSettings {
    /// Resolve defaults and relative paths against `base_dir` (the directory
    /// of the definition file).
    pub fn resolve(section: &WorkflowSection, base_dir: &Path) -> Result<Self> {
        let home_dir = match &section.home_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base_dir.join(dir),
            None => base_dir.to_path_buf(),
        };

        let database = match &section.database {
            Some(db) if db.is_absolute() => db.clone(),
            Some(db) => home_dir.join(db),
            None => home_dir.join("data").join("stepflow.db"),
        };

        // Our own `wrap` subcommand is the default worker.
        let wrapper_args = match (&section.wrapper, &section.wrapper_args) {
            (_, Some(args)) => args.clone(),
            (None, None) => vec!["wrap".to_string()],
            (Some(_), None) => Vec::new(),
        };

        let poll_interval = parse_duration(&section.poll_interval).map_err(|e| {
            StepflowError::ConfigError(format!("[workflow].poll_interval: {e}"))
        })?;

        Ok(Self {
            name: section.name.clone(),
            home_dir,
            database,
            wrapper: section.wrapper.clone(),
            wrapper_args,
            poll_interval,
            max_running: section.max_running,
        })
    }

    /// Path of the append-only step log.
    pub fn step_log_path(&self) -> PathBuf {
        self.home_dir.join("logs").join("steps.log")
    }
}

/// Validated, fully expanded workflow definition.
///
/// Steps are in a dependency-consistent order: every step appears after all
/// of the steps it depends on.
#[derive(Debug, Clone)]
pub struct WorkflowFile {
    pub workflow: WorkflowSettings,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowFile {
    /// Used by validation once the steps are known to form a DAG.
    pub(crate) fn new_unchecked(workflow: WorkflowSettings, steps: Vec<StepDefinition>) -> Self {
        Self { workflow, steps }
    }

    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Parse durations such as `"250ms"`, `"5s"`, `"2m"` or `"1h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => None,
        "s" => Some(1),
        "m" => Some(60),
        "h" => Some(60 * 60),
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };
    let duration = match secs_per_unit {
        None => Duration::from_millis(value),
        Some(factor) => value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large"))?,
    };

    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}
