/// Process Session
/// Owns one shell process: its stdin writer, a supervisor task that reaps it,
/// and the two line readers over stdout/stderr.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::{watch, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::line_reader::LineReader;
use super::process_tree;
use crate::config::ExecutorConfig;
use crate::error::{ExecError, Result};
use crate::models::{Command, ExecutionRecord, ExecutionStatus, OutputEvent};

/// How the shell process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    WaitFailed(String),
}

/// Line queues fed by the stdout/stderr readers
pub struct SessionStreams {
    pub stdout: UnboundedReceiver<String>,
    pub stderr: UnboundedReceiver<String>,
    pub readers: Vec<JoinHandle<()>>,
}

pub struct ProcessSession {
    id: String,
    program: &'static str,
    pid: Option<u32>,
    stdin: AsyncMutex<Option<ChildStdin>>,
    record: Mutex<ExecutionRecord>,
    kill: Arc<Notify>,
    exit: watch::Receiver<Option<ExitOutcome>>,
}

impl ProcessSession {
    /// Spawn the shell for `command` and start its supervisor and readers.
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        id: impl Into<String>,
        command: &Command,
        config: &ExecutorConfig,
    ) -> Result<(Arc<Self>, SessionStreams)> {
        let id = id.into();
        let shell = command.shell;
        let program = shell.program();

        let mut std_cmd = std::process::Command::new(program);
        std_cmd
            .args(shell.interactive_args())
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let cwd = resolve_working_dir(&command.working_directory);
        if let Some(dir) = &cwd {
            std_cmd.current_dir(dir);
        }

        // New session: the shell leads its own process group (signalled as a
        // whole on stop) and has no controlling terminal to contend for
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // SAFETY: setsid(2) is async-signal-safe and touches no memory
            // shared with the parent.
            unsafe {
                std_cmd.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut cmd = tokio::process::Command::from(std_cmd);
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;
        let pid = child.id();

        // Dropping `child` on any early return kills it
        let stdin = child.stdin.take().ok_or(ExecError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(ExecError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ExecError::MissingPipe("stderr"))?;

        log::info!(
            "[Session] {} started {} (pid {:?}, cwd {:?})",
            id,
            program,
            pid,
            cwd
        );

        let exited = CancellationToken::new();
        let kill = Arc::new(Notify::new());
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(supervise(
            id.clone(),
            child,
            Arc::clone(&kill),
            exited.clone(),
            exit_tx,
        ));

        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        let readers = vec![
            tokio::spawn(
                LineReader::new(stdout, exited.clone(), config.flush_after(), config.drain_window())
                    .labeled("stdout")
                    .pump(stdout_tx),
            ),
            tokio::spawn(
                LineReader::new(stderr, exited, config.flush_after(), config.drain_window())
                    .labeled("stderr")
                    .pump(stderr_tx),
            ),
        ];

        let session = Arc::new(Self {
            record: Mutex::new(ExecutionRecord::new(id.clone(), command.name.clone())),
            id,
            program,
            pid,
            stdin: AsyncMutex::new(Some(stdin)),
            kill,
            exit: exit_rx,
        });

        Ok((
            session,
            SessionStreams {
                stdout: stdout_rx,
                stderr: stderr_rx,
                readers,
            },
        ))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.record.lock().start_time
    }

    pub fn status(&self) -> ExecutionStatus {
        self.record.lock().status
    }

    pub fn snapshot(&self) -> ExecutionRecord {
        self.record.lock().clone()
    }

    /// Fold an emitted event into the session's record
    pub fn apply(&self, event: &OutputEvent) {
        self.record.lock().apply(event);
    }

    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        self.exit.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Write `text` plus a newline to the shell.
    /// Returns `Ok(false)` when the input side is already closed.
    pub async fn send_input(&self, text: &str) -> Result<bool> {
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Ok(false);
        };

        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        log::debug!("[Session] {} <- {:?}", self.id, text);
        Ok(true)
    }

    /// Close stdin, waiting for any write in progress
    pub async fn close_input(&self) {
        if self.stdin.lock().await.take().is_some() {
            log::debug!("[Session] {} input closed", self.id);
        }
    }

    /// Close stdin unless a write currently holds it
    fn try_close_input(&self) {
        match self.stdin.try_lock() {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    log::debug!("[Session] {} input closed", self.id);
                }
            }
            Err(_) => log::debug!("[Session] {} input busy, closing after termination", self.id),
        }
    }

    /// Wait up to `limit` for the process to exit
    pub async fn wait_exit(&self, limit: Duration) -> Option<ExitOutcome> {
        timeout(limit, self.wait_for_exit()).await.ok().flatten()
    }

    /// Wait for the process to exit. `None` if the supervisor vanished
    /// without reporting, which only happens when the runtime shuts down.
    pub async fn wait_for_exit(&self) -> Option<ExitOutcome> {
        let mut exit = self.exit.clone();
        let outcome = exit.wait_for(Option::is_some).await.ok()?.clone();
        outcome
    }

    /// Terminate → wait `grace` → force kill → wait `kill_wait`.
    /// Returns whether the process is confirmed gone.
    pub async fn terminate(&self, grace: Duration, kill_wait: Duration) -> bool {
        if self.has_exited() {
            return true;
        }

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            if let Err(e) = process_tree::terminate_group(pid) {
                log::warn!("[Session] {} SIGTERM to group {} failed: {}", self.id, pid, e);
            }
            if self.wait_exit(grace).await.is_some() {
                return true;
            }
            log::warn!(
                "[Session] {} still alive after {:?}, forcing kill",
                self.id,
                grace
            );
            if let Err(e) = process_tree::kill_group(pid) {
                log::error!("[Session] {} SIGKILL to group {} failed: {}", self.id, pid, e);
            }
        }
        #[cfg(not(unix))]
        let _ = grace;

        self.kill.notify_one();
        if self.wait_exit(kill_wait).await.is_some() {
            return true;
        }
        log::error!(
            "[Session] {} ({}) did not confirm exit after force kill",
            self.id,
            self.program
        );
        false
    }

    /// Caller-requested termination without closing input.
    /// The process is killed rather than sent a keyboard interrupt.
    pub async fn interrupt(&self, grace: Duration, kill_wait: Duration) {
        self.record.lock().transition(ExecutionStatus::Stopped);
        self.terminate(grace, kill_wait).await;
    }

    /// Close input, run the termination ladder and return the final record
    pub async fn stop(&self, grace: Duration, kill_wait: Duration) -> ExecutionRecord {
        self.record.lock().transition(ExecutionStatus::Stopped);
        self.try_close_input();
        self.terminate(grace, kill_wait).await;
        self.try_close_input();

        if let Some(ExitOutcome::Exited(code)) = self.exit_outcome() {
            self.record.lock().finish(Some(code), Utc::now());
        }
        self.snapshot()
    }

    /// Build the terminal event for a natural exit; duration is fixed once
    pub fn finished_event(&self, exit_code: i32) -> OutputEvent {
        let mut record = self.record.lock();
        let duration_ms = record.finish(Some(exit_code), Utc::now());
        OutputEvent::Finished {
            exit_code: record.exit_code.unwrap_or(exit_code),
            duration_ms,
            end_time: record.end_time.unwrap_or_else(Utc::now),
        }
    }

    /// Synchronous last-resort kill, usable from `Drop`
    pub fn force_kill(&self) {
        if self.has_exited() {
            return;
        }
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            if let Err(e) = process_tree::kill_group(pid) {
                log::error!("[Session] {} SIGKILL to group {} failed: {}", self.id, pid, e);
            }
        }
        self.kill.notify_one();
    }
}

/// Reap the child, honouring kill requests until it is gone
async fn supervise(
    id: String,
    mut child: Child,
    kill: Arc<Notify>,
    exited: CancellationToken,
    exit_tx: watch::Sender<Option<ExitOutcome>>,
) {
    let outcome = loop {
        tokio::select! {
            status = child.wait() => {
                break match status {
                    Ok(status) => ExitOutcome::Exited(exit_code(status)),
                    Err(e) => ExitOutcome::WaitFailed(format!("failed to wait for process: {}", e)),
                };
            }
            _ = kill.notified() => {
                if let Err(e) = child.start_kill() {
                    log::warn!("[Session] {} kill failed: {}", id, e);
                }
            }
        }
    };

    log::info!("[Session] {} exited: {:?}", id, outcome);
    exited.cancel();
    let _ = exit_tx.send(Some(outcome));
}

/// Exit code, or 128 + signal number when killed by a signal
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

fn resolve_working_dir(requested: &str) -> Option<PathBuf> {
    let requested = requested.trim();
    if requested.is_empty() {
        return None;
    }
    let path = PathBuf::from(requested);
    if path.is_dir() {
        Some(path)
    } else {
        log::warn!(
            "[Session] working directory {:?} is not a directory, using process default",
            requested
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ShellKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn blank_or_missing_directories_fall_back() {
        assert_eq!(resolve_working_dir(""), None);
        assert_eq!(resolve_working_dir("   "), None);
        assert_eq!(resolve_working_dir("/definitely/not/here/commandhub"), None);

        let dir = tempfile::tempdir().unwrap();
        let requested = dir.path().display().to_string();
        assert_eq!(resolve_working_dir(&requested), Some(dir.path().to_path_buf()));
    }

    #[cfg(unix)]
    #[test]
    fn signal_deaths_map_above_128() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(libc::SIGKILL)), 128 + libc::SIGKILL);
    }

    #[tokio::test]
    async fn spawn_failure_reports_program() {
        let command = Command::new("ghost", "").with_shell(ShellKind::Wsl);
        // `wsl` exists only on Windows hosts with WSL installed
        if which("wsl") {
            return;
        }
        let err = match ProcessSession::spawn("ghost", &command, &ExecutorConfig::default()) {
            Ok(_) => panic!("spawn should fail without wsl"),
            Err(e) => e,
        };
        assert!(matches!(err, ExecError::Spawn { ref program, .. } if program == "wsl"));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_kills_shell_and_marks_record() {
        let command = Command::new("sleeper", "").with_shell(ShellKind::GitBash);
        let (session, _streams) =
            ProcessSession::spawn("sleeper", &command, &ExecutorConfig::default()).unwrap();
        assert!(session.pid().is_some());
        assert!(session.send_input("sleep 30").await.unwrap());
        assert_eq!(session.status(), ExecutionStatus::Running);

        let record = session
            .stop(Duration::from_millis(500), Duration::from_millis(250))
            .await;
        assert_eq!(record.status, ExecutionStatus::Stopped);
        assert_eq!(session.status(), ExecutionStatus::Stopped);
        assert!(session.has_exited());
        assert!(record.exit_code.is_some());
        assert!(!session.send_input("echo late").await.unwrap());
    }

    fn which(program: &str) -> bool {
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
            .unwrap_or(false)
    }
}
