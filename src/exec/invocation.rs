// src/exec/invocation.rs

use std::path::{Path, PathBuf};

use crate::config::WorkflowSettings;
use crate::dag::Step;
use crate::errors::{Result, StepflowError};
use crate::types::RunMode;

/// Environment variable through which a worker learns which store to report to.
pub const DATABASE_ENV: &str = "STEPFLOW_DATABASE";

/// Run-wide inputs to every invocation.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub home_dir: PathBuf,
    pub run_id: i64,
    pub program: PathBuf,
    /// Arguments placed before the positional contract, e.g. `["wrap"]`.
    pub leading_args: Vec<String>,
    pub mode: RunMode,
    pub database: PathBuf,
}

impl DispatchSettings {
    /// Without a configured wrapper, workers are this executable's own
    /// `wrap` subcommand.
    pub fn from_workflow(settings: &WorkflowSettings, run_id: i64, mode: RunMode) -> Result<Self> {
        let program = match &settings.wrapper {
            Some(wrapper) => wrapper.clone(),
            None => std::env::current_exe().map_err(|e| {
                StepflowError::LaunchError(format!("cannot locate the stepflow executable: {e}"))
            })?,
        };

        Ok(Self {
            home_dir: settings.home_dir.clone(),
            run_id,
            program,
            leading_args: settings.wrapper_args.clone(),
            mode,
            database: settings.database.clone(),
        })
    }

    /// Per-step working area under the workflow home.
    pub fn step_dir(&self, step: &str) -> PathBuf {
        self.home_dir.join("steps").join(step)
    }

    pub fn err_log_path(&self, step: &str) -> PathBuf {
        self.step_dir(step).join("step.err")
    }
}

/// A fully assembled worker launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub step: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: PathBuf,
    pub err_log: PathBuf,
    /// Index in `args` where the `-name value` pairs start.
    params_at: usize,
}

impl Invocation {
    /// Arguments:
    /// `<leading..> home_dir run_id step invoker err_log mode [-name value]..`
    ///
    /// Parameters are passed in name order. Values go into argv untouched;
    /// no shell re-parses them.
    pub fn for_step(settings: &DispatchSettings, step: &Step, invoker: &str) -> Self {
        let err_log = settings.err_log_path(&step.name);

        let mut args = settings.leading_args.clone();
        args.push(path_arg(&settings.home_dir));
        args.push(settings.run_id.to_string());
        args.push(step.name.clone());
        args.push(invoker.to_string());
        args.push(path_arg(&err_log));
        args.push(settings.mode.as_str().to_string());

        let params_at = args.len();
        for (name, value) in step.params.iter() {
            args.push(format!("-{name}"));
            args.push(value.clone());
        }

        Self {
            step: step.name.clone(),
            program: settings.program.clone(),
            args,
            env: vec![(DATABASE_ENV.to_string(), path_arg(&settings.database))],
            current_dir: settings.home_dir.clone(),
            err_log,
            params_at,
        }
    }

    /// Shell-style rendering for logs: parameter values quoted and escaped.
    pub fn command_line(&self) -> String {
        let mut out = path_arg(&self.program);
        for (idx, arg) in self.args.iter().enumerate() {
            out.push(' ');
            let is_value = idx >= self.params_at && (idx - self.params_at) % 2 == 1;
            if is_value {
                out.push('"');
                out.push_str(&escape_param_value(arg));
                out.push('"');
            } else {
                out.push_str(arg);
            }
        }
        out
    }
}

/// Escape a parameter value for display inside double quotes.
pub fn escape_param_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_and_shell_metacharacters() {
        assert_eq!(escape_param_value(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(escape_param_value("$HOME`x`"), r"\$HOME\`x\`");
        assert_eq!(escape_param_value(r"a\b"), r"a\\b");
        assert_eq!(escape_param_value("plain"), "plain");
    }
}
