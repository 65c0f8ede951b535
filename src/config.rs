/// Executor configuration
/// Timing knobs of the execution engine and the environment given to shells.
/// Loaded from JSON; every key is optional.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExecError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Partial lines are flushed after this long without new output
    pub flush_after_ms: u64,
    /// Once the process has exited, how long readers wait for trailing bytes
    pub drain_window_ms: u64,
    /// Delay between spawn and writing the initial command
    pub startup_delay_ms: u64,
    pub stop_grace_ms: u64,
    pub interrupt_grace_ms: u64,
    /// Bounded wait for exit after a force kill
    pub kill_wait_ms: u64,
    pub shutdown_grace_ms: u64,
    /// Extra environment for every shell
    pub env: BTreeMap<String, String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        // Interpreters otherwise block-buffer output written to a pipe
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        env.insert("NODE_NO_READLINE".to_string(), "1".to_string());

        Self {
            flush_after_ms: 50,
            drain_window_ms: 10,
            startup_delay_ms: 200,
            stop_grace_ms: 2_000,
            interrupt_grace_ms: 100,
            kill_wait_ms: 250,
            shutdown_grace_ms: 2_000,
            env,
        }
    }
}

impl ExecutorConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ExecError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ExecError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn flush_after(&self) -> Duration {
        Duration::from_millis(self.flush_after_ms)
    }

    pub fn drain_window(&self) -> Duration {
        Duration::from_millis(self.drain_window_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_millis(self.interrupt_grace_ms)
    }

    pub fn kill_wait(&self) -> Duration {
        Duration::from_millis(self.kill_wait_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
