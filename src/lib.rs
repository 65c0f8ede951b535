//! Command hub execution engine
//! Runs saved commands and interactive terminals as shell processes, streams
//! their stdout/stderr line by line, forwards keystrokes and tears them down.
//!
//! Module structure:
//! - executor: façade consumed by the UI layer
//! - services: line readers, process sessions, registry, multiplexer
//! - models: shared data types (commands, events, execution records)

pub mod config;
pub mod error;
pub mod executor;
pub mod models;
pub mod services;

pub use config::ExecutorConfig;
pub use error::ExecError;
pub use executor::{CommandExecutor, ExecutionStream};
pub use models::{Command, ExecutionRecord, ExecutionStatus, OutputEvent, ShellKind};
