use std::io;

use thiserror::Error;

/// Failures inside the execution engine.
///
/// None of these cross the executor boundary as errors: they become
/// `OutputEvent::Error` messages or logged no-ops.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("execution '{0}' is already active")]
    DuplicateExecution(String),

    #[error("invalid executor config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ExecError>;
