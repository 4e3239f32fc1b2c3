#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use stepflow::config::{RawWorkflowFile, StepConfig, WorkflowFile, WorkflowSection};

/// Builder for `WorkflowFile` to simplify test setup.
///
/// Defaults to a fixed wrapper program so invocations do not depend on the
/// test binary's path.
pub struct WorkflowBuilder {
    raw: RawWorkflowFile,
    base_dir: PathBuf,
}

impl WorkflowBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            raw: RawWorkflowFile {
                workflow: Some(WorkflowSection {
                    name: name.to_string(),
                    home_dir: None,
                    database: None,
                    wrapper: Some(PathBuf::from("/opt/stepflow/bin/worker")),
                    wrapper_args: None,
                    poll_interval: "5s".to_string(),
                    max_running: None,
                }),
                step: BTreeMap::new(),
            },
            base_dir: std::env::temp_dir(),
        }
    }

    pub fn with_step(mut self, name: &str, step: StepConfig) -> Self {
        self.raw.step.insert(name.to_string(), step);
        self
    }

    /// Directory relative paths (home, sub-graphs) resolve against.
    pub fn base_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.base_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn home_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.section().home_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn max_running(mut self, max: usize) -> Self {
        self.section().max_running = Some(max);
        self
    }

    pub fn wrapper(mut self, program: &str, args: &[&str]) -> Self {
        let section = self.section();
        section.wrapper = Some(PathBuf::from(program));
        section.wrapper_args = Some(args.iter().map(|a| a.to_string()).collect());
        self
    }

    pub fn raw(self) -> RawWorkflowFile {
        self.raw
    }

    pub fn build(self) -> WorkflowFile {
        WorkflowFile::from_raw(self.raw, &self.base_dir)
            .expect("Failed to build valid workflow from builder")
    }

    fn section(&mut self) -> &mut WorkflowSection {
        self.raw.workflow.as_mut().expect("builder always has a section")
    }
}

/// Builder for `StepConfig`. Starts as a synthetic step.
pub struct StepConfigBuilder {
    step: StepConfig,
}

impl StepConfigBuilder {
    pub fn synthetic() -> Self {
        Self {
            step: StepConfig::default(),
        }
    }

    pub fn runnable(invoker: &str) -> Self {
        Self {
            step: StepConfig {
                invoker: Some(invoker.to_string()),
                ..StepConfig::default()
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.step.depends_on.push(dep.to_string());
        self
    }

    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.step.params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn subgraph(mut self, path: &str) -> Self {
        self.step.subgraph = Some(PathBuf::from(path));
        self
    }

    pub fn build(self) -> StepConfig {
        self.step
    }
}

/// A → B, A → C, B & C → D.
pub fn diamond(runnable: bool) -> WorkflowFile {
    let step = |name: &str| {
        if runnable {
            StepConfigBuilder::runnable(&format!("bin/{name}.sh"))
        } else {
            StepConfigBuilder::synthetic()
        }
    };

    WorkflowBuilder::new("diamond")
        .with_step("A", step("A").build())
        .with_step("B", step("B").after("A").build())
        .with_step("C", step("C").after("A").build())
        .with_step("D", step("D").after("B").after("C").build())
        .build()
}
