#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

pub use stepflow_test_utils::builders;
pub use stepflow_test_utils::init_tracing;

/// Write `contents` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

/// Step log line as written by the controller.
pub fn line(label: &str, note: &str, step: &str) -> String {
    stepflow::steplog::format_line(label, note, step)
}
