// src/exec/mod.rs

//! Worker dispatch.
//!
//! - [`invocation`] builds the command line a worker is started with.
//! - [`launcher`] provides the `Launcher` trait and the production
//!   `DetachedLauncher`, which tests replace with a recording fake.
//! - [`dispatcher`] moves ON_DECK steps forward: synthetic steps complete in
//!   place, runnable steps are claimed and handed to the launcher.

pub mod dispatcher;
pub mod invocation;
pub mod launcher;

pub use dispatcher::Dispatcher;
pub use invocation::{DispatchSettings, Invocation, escape_param_value};
pub use launcher::{DetachedLauncher, Launcher};
