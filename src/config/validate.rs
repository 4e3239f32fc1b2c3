// src/config/validate.rs

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use regex::Regex;

use crate::config::model::{
    RawWorkflowFile, StepConfig, StepDefinition, WorkflowFile, WorkflowSection, WorkflowSettings,
};
use crate::config::subgraph::expand_steps;
use crate::errors::{Result, StepflowError};

/// Step and parameter names. `.` is reserved as the sub-graph separator.
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_-]*$").expect("valid name regex"));

impl WorkflowFile {
    /// Validate a top-level definition and expand its sub-graphs.
    ///
    /// `base_dir` is the directory of the definition file; sub-graph paths and
    /// the default home directory resolve against it.
    pub fn from_raw(raw: RawWorkflowFile, base_dir: &Path) -> Result<Self> {
        let section = validate_section(raw.workflow.as_ref())?;
        let settings = WorkflowSettings::resolve(section, base_dir)?;

        validate_steps(&raw.step, base_dir)?;
        let mut including = Vec::new();
        let expanded = expand_steps(&raw.step, base_dir, &mut including)?;
        let ordered = order_steps(expanded)?;

        Ok(WorkflowFile::new_unchecked(settings, ordered))
    }
}

fn validate_section(section: Option<&WorkflowSection>) -> Result<&WorkflowSection> {
    let section = section.ok_or_else(|| {
        StepflowError::ConfigError("definition must contain a [workflow] section".to_string())
    })?;

    if section.name.trim().is_empty() {
        return Err(StepflowError::ConfigError(
            "[workflow].name must not be empty".to_string(),
        ));
    }

    if section.max_running == Some(0) {
        return Err(StepflowError::ConfigError(
            "[workflow].max_running must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(section)
}

/// Per-file checks on `[step.*]` sections, before expansion.
pub fn validate_steps(steps: &BTreeMap<String, StepConfig>, origin: &Path) -> Result<()> {
    if steps.is_empty() {
        return Err(StepflowError::ConfigError(format!(
            "{}: definition must contain at least one [step.<name>] section",
            origin.display()
        )));
    }

    for (name, step) in steps.iter() {
        if !NAME_RE.is_match(name) {
            return Err(StepflowError::ConfigError(format!(
                "invalid step name '{}' (allowed: letters, digits, '_' and '-')",
                name
            )));
        }

        if step.invoker.is_some() && step.subgraph.is_some() {
            return Err(StepflowError::ConfigError(format!(
                "step '{}' cannot have both `invoker` and `subgraph`",
                name
            )));
        }

        if step.invoker.as_deref().is_some_and(|i| i.trim().is_empty()) {
            return Err(StepflowError::ConfigError(format!(
                "step '{}' has an empty `invoker`",
                name
            )));
        }

        if step.subgraph.is_some() && !step.params.is_empty() {
            return Err(StepflowError::ConfigError(format!(
                "step '{}' is a sub-graph call and cannot take `params`",
                name
            )));
        }

        for param in step.params.keys() {
            if !NAME_RE.is_match(param) {
                return Err(StepflowError::ConfigError(format!(
                    "step '{}' has invalid parameter name '{}'",
                    name, param
                )));
            }
        }

        for dep in step.depends_on.iter() {
            if dep == name {
                return Err(StepflowError::ConfigError(format!(
                    "step '{}' cannot depend on itself in `depends_on`",
                    name
                )));
            }
            if !steps.contains_key(dep) {
                return Err(StepflowError::ConfigError(format!(
                    "step '{}' has unknown dependency '{}' in `depends_on`",
                    name, dep
                )));
            }
        }
    }

    Ok(())
}

/// Reject duplicate names and cycles, and return the steps in topological
/// order (dependencies first).
pub fn order_steps(steps: Vec<StepDefinition>) -> Result<Vec<StepDefinition>> {
    let mut seen = HashSet::new();
    for step in steps.iter() {
        if !seen.insert(step.name.as_str()) {
            return Err(StepflowError::ConfigError(format!(
                "duplicate step name '{}' after sub-graph expansion",
                step.name
            )));
        }
    }

    // Edge direction: dependency -> dependent.
    let order: Vec<String> = {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for step in steps.iter() {
            graph.add_node(step.name.as_str());
        }
        for step in steps.iter() {
            for dep in step.depends_on.iter() {
                if !seen.contains(dep.as_str()) {
                    return Err(StepflowError::ConfigError(format!(
                        "step '{}' has unknown dependency '{}'",
                        step.name, dep
                    )));
                }
                graph.add_edge(dep.as_str(), step.name.as_str(), ());
            }
        }

        match toposort(&graph, None) {
            Ok(order) => order.into_iter().map(str::to_string).collect(),
            Err(cycle) => {
                return Err(StepflowError::DagCycle(format!(
                    "cycle detected in step DAG involving step '{}'",
                    cycle.node_id()
                )));
            }
        }
    };

    let mut by_name: BTreeMap<String, StepDefinition> =
        steps.into_iter().map(|s| (s.name.clone(), s)).collect();
    Ok(order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect())
}
