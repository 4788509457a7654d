//! Out-of-process backend.
//!
//! The host side ([`ProcessBridge`]) spawns the current executable as
//! `exprbox runner` and talks newline-delimited JSON over its stdio
//! (see `exprbox_types::protocol`). The child ([`runner`]) confines itself
//! with OS limits before building its engine, so a runaway expression can
//! exhaust or crash only the child. The host process is never restricted.

mod host;
mod limits;
pub mod runner;

pub use host::ProcessBridge;
pub use runner::{Confinement, run_stdio};

/// Subcommand the runner child is started with.
pub const RUNNER_SUBCOMMAND: &str = "runner";
