/// Line Reader
/// Turns a raw, possibly bursty byte stream into lines without waiting for a
/// trailing newline: buffered text is flushed once `flush_after` has passed
/// since the last emitted line, so prompts printed without `\n` and output
/// dripping in without one still show up.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

const CHUNK_SIZE: usize = 4096;

pub struct LineReader<R> {
    source: R,
    exited: CancellationToken,
    flush_after: Duration,
    drain_window: Duration,
    buf: Vec<u8>,
    last_emit: Instant,
    done: bool,
    label: &'static str,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// `exited` fires when the owning process is gone; the reader then only
    /// drains what arrives within `drain_window`.
    pub fn new(
        source: R,
        exited: CancellationToken,
        flush_after: Duration,
        drain_window: Duration,
    ) -> Self {
        Self {
            source,
            exited,
            flush_after,
            drain_window,
            buf: Vec::new(),
            last_emit: Instant::now(),
            done: false,
            label: "stream",
        }
    }

    /// Name used in log lines ("stdout", "stderr")
    pub fn labeled(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Next line, or `None` once the stream is finished and fully flushed
    pub async fn next_line(&mut self) -> Option<String> {
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            if let Some(line) = self.take_complete_line() {
                return Some(line);
            }
            if self.done {
                return self.take_remainder();
            }

            let read = if self.exited.is_cancelled() {
                match timeout(self.drain_window, self.source.read(&mut chunk)).await {
                    Ok(result) => result,
                    Err(_) => {
                        self.done = true;
                        continue;
                    }
                }
            } else if self.buf.is_empty() {
                tokio::select! {
                    result = self.source.read(&mut chunk) => result,
                    _ = self.exited.cancelled() => continue,
                }
            } else {
                let deadline = self.last_emit + self.flush_after;
                tokio::select! {
                    result = timeout_at(deadline, self.source.read(&mut chunk)) => match result {
                        Ok(result) => result,
                        Err(_) => {
                            if let Some(line) = self.take_partial_line() {
                                return Some(line);
                            }
                            // Only an incomplete UTF-8 sequence is buffered
                            self.last_emit = Instant::now();
                            continue;
                        }
                    },
                    _ = self.exited.cancelled() => continue,
                }
            };

            match read {
                Ok(0) => self.done = true,
                Ok(n) => {
                    let was_empty = self.buf.is_empty();
                    self.buf.extend(chunk[..n].iter().filter(|b| **b != b'\r'));
                    // Flush window opens with the first buffered byte
                    if was_empty && !self.buf.is_empty() {
                        self.last_emit = Instant::now();
                    }
                }
                Err(e) => {
                    log::warn!("[LineReader] {} read failed, treating as EOF: {}", self.label, e);
                    self.done = true;
                }
            }
        }
    }

    /// Feed every line into `tx` until the stream ends or the receiver is gone
    pub async fn pump(mut self, tx: UnboundedSender<String>) {
        while let Some(line) = self.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
        log::debug!("[LineReader] {} closed", self.label);
    }

    fn take_complete_line(&mut self) -> Option<String> {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.buf, rest);
            line.pop();
            if !line.is_empty() {
                self.last_emit = Instant::now();
                return Some(String::from_utf8_lossy(&line).into_owned());
            }
        }
        None
    }

    /// Flush buffered text, holding back an incomplete trailing UTF-8 sequence
    fn take_partial_line(&mut self) -> Option<String> {
        let cut = self.buf.len() - incomplete_utf8_tail(&self.buf);
        if cut == 0 {
            return None;
        }
        let rest = self.buf.split_off(cut);
        let line = std::mem::replace(&mut self.buf, rest);
        self.last_emit = Instant::now();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Length of a UTF-8 sequence cut short at the end of `buf`, 0 if none
fn incomplete_utf8_tail(buf: &[u8]) -> usize {
    for back in 1..=buf.len().min(3) {
        let byte = buf[buf.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}
