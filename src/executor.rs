/// Execution façade
/// The surface the UI layer talks to: start executions and terminals, feed
/// them input, interrupt or stop them, and observe their event streams.
/// Failures never cross this boundary; they become `Error` events or logged
/// no-ops.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use chrono::Utc;
use futures::future::join_all;
use futures::Stream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::ExecutorConfig;
use crate::error::ExecError;
use crate::models::{Command, ExecutionRecord, OutputEvent, ShellKind};
use crate::services::{multiplex, ExitOutcome, ProcessSession, SessionRegistry, SessionStreams};

/// Ordered events of one execution. Ends after the terminal event.
pub struct ExecutionStream {
    execution_id: String,
    events: UnboundedReceiver<OutputEvent>,
}

impl ExecutionStream {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub async fn recv(&mut self) -> Option<OutputEvent> {
        self.events.recv().await
    }

    /// Drain the stream to its end
    pub async fn collect_events(mut self) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        events
    }
}

impl Stream for ExecutionStream {
    type Item = OutputEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

#[derive(Clone)]
pub struct CommandExecutor {
    registry: Arc<SessionRegistry>,
    config: Arc<ExecutorConfig>,
    terminal_seq: Arc<AtomicU64>,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            config: Arc::new(config),
            terminal_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Start `command` under `execution_id`.
    ///
    /// Must be called from within a tokio runtime. The session is registered
    /// before this returns, so input can be sent right away. Reusing an id
    /// that is still active yields `Started, Error` and leaves the running
    /// execution alone.
    pub fn execute_command(
        &self,
        command: &Command,
        execution_id: impl Into<String>,
    ) -> ExecutionStream {
        let execution_id = execution_id.into();
        let (tx, events) = mpsc::unbounded_channel();
        let stream = ExecutionStream {
            execution_id: execution_id.clone(),
            events,
        };

        log::info!("[Executor] Starting execution {}", execution_id);

        if self.registry.contains(&execution_id) {
            reject(&tx, ExecError::DuplicateExecution(execution_id));
            return stream;
        }

        let (session, streams) = match ProcessSession::spawn(&execution_id, command, &self.config)
        {
            Ok(spawned) => spawned,
            Err(e) => {
                log::error!("[Executor] {} failed to start: {}", execution_id, e);
                reject(&tx, e);
                return stream;
            }
        };

        if let Err(e) = self.registry.register(Arc::clone(&session)) {
            // Lost a race for the same id
            session.force_kill();
            reject(&tx, e);
            return stream;
        }

        let _ = tx.send(OutputEvent::Started {
            start_time: session.start_time(),
        });

        let initial_input = command
            .has_initial_input()
            .then(|| command.command.clone());

        tokio::spawn(drive(
            session,
            streams,
            initial_input,
            !command.interactive,
            Arc::downgrade(&self.registry),
            Arc::clone(&self.config),
            tx,
        ));

        stream
    }

    /// Bare shell with no initial command; an empty directory means $HOME
    pub fn start_interactive_terminal(
        &self,
        working_directory: &str,
        shell: ShellKind,
    ) -> ExecutionStream {
        let working_directory = if working_directory.trim().is_empty() {
            dirs::home_dir()
                .map(|home| home.display().to_string())
                .unwrap_or_default()
        } else {
            working_directory.to_string()
        };

        let command = Command::terminal(working_directory, shell);
        let execution_id = format!(
            "interactive_{}_{}",
            Utc::now().timestamp_millis(),
            self.terminal_seq.fetch_add(1, Ordering::Relaxed)
        );
        self.execute_command(&command, execution_id)
    }

    /// Stop an execution and return its final record. Unknown ids are a no-op.
    pub async fn stop_execution(&self, execution_id: &str) -> Option<ExecutionRecord> {
        let Some(session) = self.registry.unregister(execution_id) else {
            log::debug!("[Executor] stop: no active execution {}", execution_id);
            return None;
        };

        log::info!("[Executor] Stopping execution {}", execution_id);
        let record = session
            .stop(self.config.stop_grace(), self.config.kill_wait())
            .await;
        Some(record)
    }

    pub async fn send_input_to_terminal(&self, execution_id: &str, input: &str) {
        let Some(session) = self.registry.lookup(execution_id) else {
            log::warn!(
                "[Executor] No active execution {} for input. Active: {:?}",
                execution_id,
                self.registry.ids()
            );
            return;
        };

        match session.send_input(input).await {
            Ok(true) => {}
            Ok(false) => log::warn!("[Executor] {} input already closed", execution_id),
            Err(e) => log::error!("[Executor] Sending input to {} failed: {}", execution_id, e),
        }
    }

    /// Terminates the process; there is no portable keyboard interrupt
    pub async fn send_interrupt_signal(&self, execution_id: &str) {
        let Some(session) = self.registry.lookup(execution_id) else {
            log::warn!("[Executor] No active process for interrupt {}", execution_id);
            return;
        };

        log::info!("[Executor] Interrupting execution {}", execution_id);
        session
            .interrupt(self.config.interrupt_grace(), self.config.kill_wait())
            .await;
    }

    pub fn snapshot(&self, execution_id: &str) -> Option<ExecutionRecord> {
        self.registry
            .lookup(execution_id)
            .map(|session| session.snapshot())
    }

    pub fn is_active(&self, execution_id: &str) -> bool {
        self.registry.contains(execution_id)
    }

    pub fn active_executions(&self) -> Vec<String> {
        self.registry.ids()
    }

    /// Stop everything still running. Call once when the application exits.
    pub async fn shutdown(&self) {
        let sessions = self.registry.drain();
        log::info!(
            "[Executor] Shutting down - terminating {} processes",
            sessions.len()
        );

        let grace = self.config.shutdown_grace();
        let kill_wait = self.config.kill_wait();
        join_all(sessions.iter().map(|session| session.stop(grace, kill_wait))).await;
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

fn reject(tx: &UnboundedSender<OutputEvent>, error: ExecError) {
    let _ = tx.send(OutputEvent::Started {
        start_time: Utc::now(),
    });
    let _ = tx.send(OutputEvent::Error {
        message: error.to_string(),
    });
}

/// Deregisters the session however the driver ends
struct Deregister {
    registry: Weak<SessionRegistry>,
    session: Arc<ProcessSession>,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister_session(&self.session);
        }
    }
}

/// Per-execution driver: inject the initial command, forward output, then
/// report the exit as the final event.
async fn drive(
    session: Arc<ProcessSession>,
    streams: SessionStreams,
    initial_input: Option<String>,
    close_after_input: bool,
    registry: Weak<SessionRegistry>,
    config: Arc<ExecutorConfig>,
    tx: UnboundedSender<OutputEvent>,
) {
    let guard = Deregister {
        registry,
        session: Arc::clone(&session),
    };
    let SessionStreams {
        stdout,
        stderr,
        readers,
    } = streams;

    if let Some(text) = initial_input {
        // Give the shell a moment to come up; not a readiness guarantee
        tokio::time::sleep(config.startup_delay()).await;
        match session.send_input(&text).await {
            Ok(true) => {}
            Ok(false) => log::warn!("[Executor] {} closed before initial command", session.id()),
            Err(e) => log::error!("[Executor] {} initial command failed: {}", session.id(), e),
        }
    }
    if close_after_input {
        session.close_input().await;
    }

    let stats = multiplex(stdout, stderr, |event| {
        session.apply(&event);
        let _ = tx.send(event);
    })
    .await;

    for reader in readers {
        if let Err(e) = reader.await {
            log::error!("[Executor] {} reader task failed: {}", session.id(), e);
        }
    }

    let terminal = match session.wait_for_exit().await {
        Some(ExitOutcome::Exited(code)) => session.finished_event(code),
        Some(ExitOutcome::WaitFailed(message)) => OutputEvent::Error { message },
        None => OutputEvent::Error {
            message: "process supervisor ended without an exit status".to_string(),
        },
    };
    session.apply(&terminal);

    log::info!(
        "[Executor] {} finished ({} stdout / {} stderr lines): {:?}",
        session.id(),
        stats.stdout_lines,
        stats.stderr_lines,
        terminal
    );

    drop(guard);
    let _ = tx.send(terminal);
}
