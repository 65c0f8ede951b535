#![cfg(unix)]

use std::time::{Duration, Instant};

use commandhub_lib::{
    Command, CommandExecutor, ExecutionStatus, ExecutionStream, ExecutorConfig, OutputEvent,
    ShellKind,
};
use pretty_assertions::assert_eq;
use tokio::time::timeout;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn executor() -> CommandExecutor {
    let config = ExecutorConfig {
        startup_delay_ms: 100,
        ..ExecutorConfig::default()
    };
    CommandExecutor::new(config)
}

fn bash(name: &str, text: &str) -> Command {
    Command::new(name, text).with_shell(ShellKind::GitBash)
}

fn has_bash() -> bool {
    std::process::Command::new("bash")
        .arg("-c")
        .arg("true")
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

async fn collect(stream: ExecutionStream) -> Vec<OutputEvent> {
    timeout(EVENT_TIMEOUT, stream.collect_events())
        .await
        .expect("execution should reach a terminal event")
}

/// Read events until one matches; panics on terminal events or timeout
async fn wait_for<F>(stream: &mut ExecutionStream, mut pred: F) -> Vec<OutputEvent>
where
    F: FnMut(&OutputEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = timeout(EVENT_TIMEOUT, stream.recv())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended early");
        let matched = pred(&event);
        assert!(
            matched || !event.is_terminal(),
            "terminal event before match: {event:?}"
        );
        seen.push(event);
        if matched {
            return seen;
        }
    }
}

fn stdout_lines(events: &[OutputEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            OutputEvent::StdOut { line } => Some(line.clone()),
            _ => None,
        })
        .collect()
}

/// `Started, (StdOut | StdErr)*, (Finished | Error)`
fn assert_protocol(events: &[OutputEvent]) {
    assert!(
        matches!(events.first(), Some(OutputEvent::Started { .. })),
        "first event must be Started: {events:?}"
    );
    let started = events
        .iter()
        .filter(|e| matches!(e, OutputEvent::Started { .. }))
        .count();
    let terminal = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(started, 1);
    assert_eq!(terminal, 1);
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn echo_runs_to_completion() {
    if !has_bash() {
        return;
    }
    let executor = executor();
    let stream = executor.execute_command(&bash("echo", "echo hello").batch(), "exec-echo");
    assert_eq!(stream.execution_id(), "exec-echo");

    let events = collect(stream).await;
    assert_protocol(&events);
    assert!(stdout_lines(&events).contains(&"hello".to_string()));
    match events.last() {
        Some(OutputEvent::Finished { exit_code, .. }) => assert_eq!(*exit_code, 0),
        other => panic!("expected Finished, got {other:?}"),
    }
    assert!(!executor.is_active("exec-echo"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_command_reports_its_exit_code() {
    if !has_bash() {
        return;
    }
    let executor = executor();
    let events = collect(executor.execute_command(&bash("fail", "exit 3").batch(), "exec-fail")).await;
    assert_protocol(&events);
    assert!(matches!(
        events.last(),
        Some(OutputEvent::Finished { exit_code: 3, .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stdout_order_is_preserved() {
    if !has_bash() {
        return;
    }
    let executor = executor();
    let script = "for i in $(seq 1 300); do echo line$i; echo noise$i >&2; done";
    let events = collect(executor.execute_command(&bash("seq", script).batch(), "exec-seq")).await;
    assert_protocol(&events);

    let lines: Vec<String> = stdout_lines(&events)
        .into_iter()
        .filter(|line| line.starts_with("line"))
        .collect();
    let expected: Vec<String> = (1..=300).map(|i| format!("line{i}")).collect();
    assert_eq!(lines, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn terminal_accepts_input_and_stays_running() {
    if !has_bash() {
        return;
    }
    let executor = executor();
    let dir = tempfile::tempdir().unwrap();
    let mut stream =
        executor.start_interactive_terminal(&dir.path().display().to_string(), ShellKind::GitBash);
    let id = stream.execution_id().to_string();
    assert!(id.starts_with("interactive_"));
    assert!(executor.is_active(&id));

    executor.send_input_to_terminal(&id, "echo a").await;
    wait_for(&mut stream, |e| matches!(e, OutputEvent::StdOut { line } if line == "a")).await;

    let record = executor.snapshot(&id).expect("terminal is still active");
    assert_eq!(record.status, ExecutionStatus::Running);
    assert!(record.output.contains("a\n"));

    executor.send_input_to_terminal(&id, "pwd").await;
    let cwd = dir.path().canonicalize().unwrap().display().to_string();
    wait_for(&mut stream, |e| matches!(e, OutputEvent::StdOut { line } if *line == cwd)).await;

    executor.stop_execution(&id).await.expect("terminal was active");
    let rest = collect(stream).await;
    assert!(rest.last().unwrap().is_terminal());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prompt_without_newline_is_delivered() {
    if !has_bash() {
        return;
    }
    let executor = executor();
    let mut stream = executor.execute_command(
        &bash("prompt", "printf 'ready> '; sleep 30"),
        "exec-prompt",
    );

    wait_for(&mut stream, |e| matches!(e, OutputEvent::StdOut { line } if line == "ready> ")).await;
    assert!(executor.is_active("exec-prompt"));
    executor.stop_execution("exec-prompt").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_is_bounded_and_idempotent() {
    if !has_bash() {
        return;
    }
    let executor = executor();
    let stream = executor.execute_command(&bash("sleep", "sleep 30"), "exec-stop");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let record = executor
        .stop_execution("exec-stop")
        .await
        .expect("first stop sees the session");
    assert!(started.elapsed() <= Duration::from_millis(2_500));
    assert_eq!(record.status, ExecutionStatus::Stopped);
    assert!(record.exit_code.is_some(), "process should be gone: {record:?}");
    assert!(!executor.is_active("exec-stop"));

    assert!(executor.stop_execution("exec-stop").await.is_none());

    let events = collect(stream).await;
    assert_protocol(&events);
    let finished = events
        .iter()
        .filter(|e| matches!(e, OutputEvent::Finished { .. }))
        .count();
    assert_eq!(finished, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interrupt_terminates_the_process() {
    if !has_bash() {
        return;
    }
    let executor = executor();
    let mut stream = executor.execute_command(&bash("sleep", "echo go; sleep 30"), "exec-int");
    wait_for(&mut stream, |e| matches!(e, OutputEvent::StdOut { line } if line == "go")).await;

    executor.send_interrupt_signal("exec-int").await;
    let events = collect(stream).await;
    match events.last() {
        Some(OutputEvent::Finished { exit_code, .. }) => assert_ne!(*exit_code, 0),
        other => panic!("expected Finished, got {other:?}"),
    }
    assert!(!executor.is_active("exec-int"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stale_ids_are_silent_no_ops() {
    let executor = executor();
    executor.send_input_to_terminal("never-started", "echo hi").await;
    executor.send_interrupt_signal("never-started").await;
    assert!(executor.stop_execution("never-started").await.is_none());
    assert!(executor.snapshot("never-started").is_none());
    assert!(executor.active_executions().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stopped_ids_are_silent_no_ops() {
    if !has_bash() {
        return;
    }
    let executor = executor();
    let stream = executor.execute_command(&bash("sleep", "sleep 30"), "exec-gone");
    executor
        .stop_execution("exec-gone")
        .await
        .expect("first stop sees the session");

    executor.send_input_to_terminal("exec-gone", "echo late").await;
    executor.send_interrupt_signal("exec-gone").await;
    assert!(!executor.is_active("exec-gone"));
    assert!(executor.active_executions().is_empty());
    assert!(executor.snapshot("exec-gone").is_none());

    let events = collect(stream).await;
    assert_protocol(&events);
    assert!(!stdout_lines(&events).contains(&"late".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_working_directory_falls_back() {
    if !has_bash() {
        return;
    }
    let executor = executor();
    let command = bash("pwd", "pwd").batch().in_directory("/no/such/dir/for/commandhub");
    let events = collect(executor.execute_command(&command, "exec-cwd")).await;
    assert_protocol(&events);
    assert!(matches!(
        events.last(),
        Some(OutputEvent::Finished { exit_code: 0, .. })
    ));
    assert!(!stdout_lines(&events).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stopping_one_session_leaves_others_running() {
    if !has_bash() {
        return;
    }
    let executor = executor();
    let first = executor.execute_command(&bash("a", ""), "exec-a");
    let mut second = executor.execute_command(&bash("b", ""), "exec-b");
    assert_eq!(
        executor.active_executions(),
        vec!["exec-a".to_string(), "exec-b".to_string()]
    );

    executor.stop_execution("exec-a").await.unwrap();
    let first_events = collect(first).await;
    assert_protocol(&first_events);

    executor.send_input_to_terminal("exec-b", "echo still-here").await;
    wait_for(&mut second, |e| matches!(e, OutputEvent::StdOut { line } if line == "still-here"))
        .await;
    assert_eq!(executor.active_executions(), vec!["exec-b".to_string()]);

    executor.stop_execution("exec-b").await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reused_active_id_is_rejected() {
    if !has_bash() {
        return;
    }
    let executor = executor();
    let _running = executor.execute_command(&bash("first", ""), "exec-dup");
    let events = collect(executor.execute_command(&bash("second", "echo nope"), "exec-dup")).await;

    assert_protocol(&events);
    assert_eq!(events.len(), 2);
    match &events[1] {
        OutputEvent::Error { message } => assert!(message.contains("already active")),
        other => panic!("expected Error, got {other:?}"),
    }
    assert!(executor.is_active("exec-dup"));
    executor.stop_execution("exec-dup").await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn spawn_failure_is_a_single_error_event() {
    let wsl_present = std::process::Command::new("wsl")
        .arg("--help")
        .output()
        .is_ok();
    if wsl_present {
        return;
    }
    let executor = executor();
    let command = Command::new("wsl", "echo hi").with_shell(ShellKind::Wsl);
    let events = collect(executor.execute_command(&command, "exec-wsl")).await;

    assert_protocol(&events);
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[1], OutputEvent::Error { message } if message.contains("wsl")));
    assert!(!executor.is_active("exec-wsl"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_terminates_everything() {
    if !has_bash() {
        return;
    }
    let executor = executor();
    let streams = vec![
        executor.execute_command(&bash("one", "sleep 30"), "exec-1"),
        executor.execute_command(&bash("two", "sleep 30"), "exec-2"),
    ];

    executor.shutdown().await;
    assert!(executor.active_executions().is_empty());

    for stream in streams {
        let events = collect(stream).await;
        assert_protocol(&events);
    }
}
