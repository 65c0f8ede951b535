/// Models module
/// Shared data types between the execution engine and the UI layer
/// All types here are serializable for IPC

pub mod command;
pub mod execution;

pub use command::{Command, ShellKind};
pub use execution::{ExecutionRecord, ExecutionStatus, OutputEvent};
