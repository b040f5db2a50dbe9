//! System API test harness common library
//!
//! Shared types, errors and the command runner used by every part of the
//! harness that talks to an external tool.

pub mod command;
pub mod error;
pub mod testing;
pub mod types;

// Re-export commonly used types
pub use command::{
    quote, CommandError, CommandLine, CommandRunner, DiagnosticSink, NoopSink, RunOptions,
    RunResult, ShellRunner, TracingSink, DEFAULT_TIMEOUT,
};
pub use error::{Error, Result};
pub use types::*;

/// Harness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logical inventory host name every run descriptor targets
pub const LOGICAL_HOST: &str = "system-api-test";
