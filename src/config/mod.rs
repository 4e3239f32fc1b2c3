// src/config/mod.rs

//! Workflow definition loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a definition from disk, expanding nested sub-graphs (`loader.rs`,
//!   `subgraph.rs`).
//! - Validate names, dependencies and acyclicity (`validate.rs`).

pub mod loader;
pub mod model;
pub mod subgraph;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    RawWorkflowFile, StepConfig, StepDefinition, WorkflowFile, WorkflowSection,
    WorkflowSettings,
};
