/// Execution models
/// Runtime-only state of one execution and the events it emits to the UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an execution. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Stopped,
    /// Declared for persisted history compatibility; the engine never produces it.
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        }
    }
}

/// One unit of the per-execution event protocol.
///
/// Every stream reads `Started, (StdOut | StdErr)*, (Finished | Error)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutputEvent {
    #[serde(rename_all = "camelCase")]
    Started { start_time: DateTime<Utc> },
    StdOut { line: String },
    StdErr { line: String },
    #[serde(rename_all = "camelCase")]
    Finished {
        exit_code: i32,
        duration_ms: u64,
        end_time: DateTime<Utc>,
    },
    Error { message: String },
}

impl OutputEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutputEvent::Finished { .. } | OutputEvent::Error { .. })
    }
}

/// Snapshot of an execution: accumulated output plus lifecycle bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub command_name: String,
    pub status: ExecutionStatus,
    pub output: String,
    pub error_output: String,
    pub exit_code: Option<i32>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl ExecutionRecord {
    pub fn new(execution_id: impl Into<String>, command_name: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            command_name: command_name.into(),
            status: ExecutionStatus::Running,
            output: String::new(),
            error_output: String::new(),
            exit_code: None,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
        }
    }

    /// First terminal transition wins; later ones are ignored.
    pub fn transition(&mut self, status: ExecutionStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }

    /// Record exit details once. Returns the duration in milliseconds.
    pub fn finish(&mut self, exit_code: Option<i32>, end_time: DateTime<Utc>) -> u64 {
        if let Some(duration) = self.duration_ms {
            return duration;
        }
        let duration = (end_time - self.start_time).num_milliseconds().max(0) as u64;
        self.exit_code = exit_code;
        self.end_time = Some(end_time);
        self.duration_ms = Some(duration);
        duration
    }

    /// Fold one event into the snapshot
    pub fn apply(&mut self, event: &OutputEvent) {
        match event {
            OutputEvent::Started { start_time } => self.start_time = *start_time,
            OutputEvent::StdOut { line } => {
                self.output.push_str(line);
                self.output.push('\n');
            }
            OutputEvent::StdErr { line } => {
                self.error_output.push_str(line);
                self.error_output.push('\n');
            }
            OutputEvent::Finished {
                exit_code,
                end_time,
                ..
            } => {
                self.finish(Some(*exit_code), *end_time);
                self.transition(ExecutionStatus::from_exit_code(*exit_code));
            }
            OutputEvent::Error { message } => {
                self.error_output.push_str(message);
                self.error_output.push('\n');
                self.finish(None, Utc::now());
                self.transition(ExecutionStatus::Failed);
            }
        }
    }
}
