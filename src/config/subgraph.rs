// src/config/subgraph.rs

//! Sub-graph expansion.
//!
//! A step declaring `subgraph = "<file>"` becomes three things:
//!
//! - a synthetic *call* step keeping the step's own name,
//! - the nested file's steps, renamed `<name>.<child>`, whose roots depend on
//!   the call step,
//! - a synthetic *return* step `<name>.return` depending on every nested leaf.
//!
//! Outer steps that depended on `<name>` depend on `<name>.return` instead,
//! so the whole nested graph sits between them.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::loader::load_from_path;
use crate::config::model::{StepConfig, StepDefinition};
use crate::config::validate::validate_steps;
use crate::dag::{StepKind, SyntheticRole};
use crate::errors::{Result, StepflowError};

/// Name of the synthetic step that closes the sub-graph called by `call`.
pub fn return_step_name(call: &str) -> String {
    format!("{call}.return")
}

/// Expand one file's `[step.*]` map into definitions with qualified names.
///
/// `including` is the stack of sub-graph files currently being expanded, used
/// to reject files that include themselves.
pub fn expand_steps(
    steps: &BTreeMap<String, StepConfig>,
    base_dir: &Path,
    including: &mut Vec<PathBuf>,
) -> Result<Vec<StepDefinition>> {
    let exit_name = |dep: &String| -> String {
        match steps.get(dep) {
            Some(cfg) if cfg.subgraph.is_some() => return_step_name(dep),
            _ => dep.clone(),
        }
    };

    let mut out = Vec::new();

    for (name, cfg) in steps.iter() {
        let depends_on: Vec<String> = cfg.depends_on.iter().map(&exit_name).collect();

        let Some(sub) = &cfg.subgraph else {
            let kind = match &cfg.invoker {
                Some(invoker) => StepKind::Runnable {
                    invoker: invoker.clone(),
                },
                None => StepKind::Synthetic(SyntheticRole::Marker),
            };
            out.push(StepDefinition {
                name: name.clone(),
                kind,
                depends_on,
                params: cfg.params.clone(),
            });
            continue;
        };

        let nested = expand_file(name, &base_dir.join(sub), including)?;
        out.push(StepDefinition {
            name: name.clone(),
            kind: StepKind::Synthetic(SyntheticRole::SubgraphCall),
            depends_on,
            params: BTreeMap::new(),
        });
        out.extend(splice_nested(name, nested));
    }

    Ok(out)
}

fn expand_file(
    call: &str,
    path: &Path,
    including: &mut Vec<PathBuf>,
) -> Result<Vec<StepDefinition>> {
    let canonical = fs::canonicalize(path).map_err(|e| {
        StepflowError::ConfigError(format!(
            "step '{}': cannot read sub-graph {}: {}",
            call,
            path.display(),
            e
        ))
    })?;

    if including.contains(&canonical) {
        return Err(StepflowError::ConfigError(format!(
            "step '{}': sub-graph {} includes itself",
            call,
            canonical.display()
        )));
    }

    debug!(step = %call, file = %canonical.display(), "expanding sub-graph");
    let raw = load_from_path(&canonical)?;
    validate_steps(&raw.step, &canonical)?;

    let nested_dir = canonical
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    including.push(canonical);
    let expanded = expand_steps(&raw.step, &nested_dir, including);
    including.pop();
    expanded
}

/// Prefix nested names with `call.` and wire roots and leaves to the
/// call/return markers.
fn splice_nested(call: &str, nested: Vec<StepDefinition>) -> Vec<StepDefinition> {
    let depended_on: HashSet<&str> = nested
        .iter()
        .flat_map(|s| s.depends_on.iter().map(String::as_str))
        .collect();
    let leaves: Vec<String> = nested
        .iter()
        .filter(|s| !depended_on.contains(s.name.as_str()))
        .map(|s| format!("{call}.{}", s.name))
        .collect();

    let mut out: Vec<StepDefinition> = nested
        .iter()
        .map(|s| {
            let depends_on = if s.depends_on.is_empty() {
                vec![call.to_string()]
            } else {
                s.depends_on.iter().map(|d| format!("{call}.{d}")).collect()
            };
            StepDefinition {
                name: format!("{call}.{}", s.name),
                kind: s.kind.clone(),
                depends_on,
                params: s.params.clone(),
            }
        })
        .collect();

    out.push(StepDefinition {
        name: return_step_name(call),
        kind: StepKind::Synthetic(SyntheticRole::SubgraphReturn),
        depends_on: leaves,
        params: BTreeMap::new(),
    });
    out
}
