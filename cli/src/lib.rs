//! Thin admin CLI over the ProgressDB core engine: opens a `Core`, runs one
//! subcommand against it, then shuts it down cleanly.

pub mod config;
pub mod trace;
