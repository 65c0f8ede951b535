/// Output Multiplexer
/// Merges the stdout and stderr line queues of one session into a single
/// event sequence. Neither queue is favoured: `select!` picks a ready branch
/// at random, and both queues are drained to completion before returning.

use tokio::sync::mpsc::UnboundedReceiver;

use crate::models::OutputEvent;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexStats {
    pub stdout_lines: usize,
    pub stderr_lines: usize,
}

/// Forward every line to `emit` until both queues are closed
pub async fn multiplex<F>(
    mut stdout: UnboundedReceiver<String>,
    mut stderr: UnboundedReceiver<String>,
    mut emit: F,
) -> MultiplexStats
where
    F: FnMut(OutputEvent),
{
    let mut stats = MultiplexStats::default();
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            line = stdout.recv(), if stdout_open => match line {
                Some(line) => {
                    stats.stdout_lines += 1;
                    emit(OutputEvent::StdOut { line });
                }
                None => stdout_open = false,
            },
            line = stderr.recv(), if stderr_open => match line {
                Some(line) => {
                    stats.stderr_lines += 1;
                    emit(OutputEvent::StdErr { line });
                }
                None => stderr_open = false,
            },
        }
    }

    stats
}
