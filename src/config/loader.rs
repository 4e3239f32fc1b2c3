// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{RawWorkflowFile, WorkflowFile};
use crate::errors::Result;

/// Load a definition file and return the raw `RawWorkflowFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkflowFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let raw: RawWorkflowFile = toml::from_str(&contents)?;

    Ok(raw)
}

/// Load a definition from path, validate it and expand its sub-graphs.
///
/// This is the entry point for the rest of the application:
///
/// - Reads TOML.
/// - Checks step/parameter names, unknown or self dependencies.
/// - Expands `subgraph = "..."` steps into call/return markers.
/// - Rejects cycles and returns steps in dependency order.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkflowFile> {
    let path = path.as_ref();
    let raw = load_from_path(path)?;
    WorkflowFile::from_raw(raw, &definition_dir(path))
}

/// Directory a definition's relative paths resolve against.
///
/// A bare filename like `Stepflow.toml` (parent = "") resolves against the
/// current working directory.
pub fn definition_dir(path: &Path) -> PathBuf {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    fs::canonicalize(&dir).unwrap_or(dir)
}
