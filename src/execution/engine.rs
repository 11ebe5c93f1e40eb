//! Command execution engine.
//!
//! One [`ExecutionLoop::run`] call drives a single child on the calling
//! thread: a bounded readiness poll over stdin and the open output pipes,
//! line splitting and logging, a wall-clock deadline, and exit status
//! polling.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::command::Command;
use super::result::{ExecResult, OutputLine, OutputSource};
use super::spawner::{ChildProcess, Ready, SpawnRequest, Spawner};
use super::state::ExecState;
use crate::error::ExecError;
use crate::logging::log_at;
use crate::Result;

/// Default readiness-poll slice.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default wait between SIGTERM and SIGKILL on timeout.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

/// Default buffer size for reading pipe output.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Sleep between exit checks while waiting out the kill grace.
const REAP_TICK: Duration = Duration::from_millis(10);

/// Wait between attempts to hand a line to a full sink.
const SINK_RETRY: Duration = Duration::from_millis(5);

/// Upper bound on reads per stream in one wake-up, so a chatty child cannot
/// hold off the deadline check.
const MAX_READS_PER_WAKE: usize = 64;

/// Tunables of the execution loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Longest single wait in the readiness poll.
    pub poll_interval: Duration,
    /// Wait after SIGTERM before escalating to SIGKILL.
    pub kill_grace: Duration,
    /// Bytes requested per read.
    pub read_buffer_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            kill_grace: DEFAULT_KILL_GRACE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// Splits a byte stream into newline-terminated lines.
#[derive(Debug, Default)]
struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    /// Feed bytes, returning every line completed by them.
    fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut rest = data;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            lines.push(strip_cr(std::mem::take(&mut self.partial)));
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);
        lines
    }

    /// Flush an unterminated last line.
    fn finish(&mut self) -> Option<Vec<u8>> {
        (!self.partial.is_empty()).then(|| strip_cr(std::mem::take(&mut self.partial)))
    }
}

fn strip_cr(mut line: Vec<u8>) -> Vec<u8> {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    line
}

/// Capture state of one opened output stream.
#[derive(Debug)]
struct Capture {
    source: OutputSource,
    lines: Vec<Vec<u8>>,
    buffer: LineBuffer,
    open: bool,
}

impl Capture {
    fn new(source: OutputSource) -> Self {
        Self {
            source,
            lines: Vec::new(),
            buffer: LineBuffer::default(),
            open: true,
        }
    }
}

/// Stdin payload still being written.
#[derive(Debug)]
struct StdinFeed<'a> {
    data: &'a [u8],
    written: usize,
}

impl StdinFeed<'_> {
    fn done(&self) -> bool {
        self.written >= self.data.len()
    }
}

/// Drives one child process to completion or forced termination.
pub struct ExecutionLoop<'a> {
    spawner: &'a dyn Spawner,
    settings: EngineSettings,
    sink: Option<&'a mpsc::Sender<OutputLine>>,
}

impl<'a> ExecutionLoop<'a> {
    /// Create a loop over the given spawner.
    pub fn new(spawner: &'a dyn Spawner, settings: EngineSettings) -> Self {
        Self {
            spawner,
            settings,
            sink: None,
        }
    }

    /// Forward every captured line to `sink` as it arrives.
    ///
    /// While the channel is full the loop retries until the deadline passes,
    /// then drops lines for the sink; the result still holds every line.
    /// Without a deadline it waits for the receiver. Lines are dropped once
    /// the receiver closes. The loop must not run on an async executor
    /// thread.
    pub fn with_sink(mut self, sink: &'a mpsc::Sender<OutputLine>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Run `command`, logging and storing `masked` in place of its text.
    ///
    /// Returns [`ExecError::Timeout`] once `timeout` elapses; the child is
    /// killed and captured output is discarded.
    pub fn run(
        &self,
        command: &Command,
        masked: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecResult> {
        let mut state = ExecState::Idle;
        let request = SpawnRequest {
            line: &command.line,
            cwd: command.cwd.as_deref(),
            env: &command.env,
            open_stdout: command.open_stdout,
            open_stderr: command.open_stderr,
        };

        let started = Instant::now();
        let mut child = self
            .spawner
            .spawn(&request)
            .map_err(|source| ExecError::Spawn {
                command: masked.to_string(),
                source,
            })?;
        state.transition_to(ExecState::Spawned)?;
        tracing::trace!(pid = ?child.id(), "child spawned");

        let deadline = timeout.and_then(|limit| started.checked_add(limit));
        let mut stdin = command
            .stdin
            .as_deref()
            .map(|data| StdinFeed { data, written: 0 })
            .filter(|feed| !feed.done());
        if stdin.is_none() {
            child.close_stdin();
        }

        let mut stdout = command
            .open_stdout
            .then(|| Capture::new(OutputSource::Stdout));
        let mut stderr = command
            .open_stderr
            .then(|| Capture::new(OutputSource::Stderr));
        let mut buf = vec![0u8; self.settings.read_buffer_size.max(1)];

        let exit_code = loop {
            let active: Vec<OutputSource> = [stdout.as_ref(), stderr.as_ref()]
                .into_iter()
                .flatten()
                .filter(|capture| capture.open)
                .map(|capture| capture.source)
                .collect();

            if active.is_empty() && stdin.is_none() {
                state.transition_to(ExecState::Polling)?;
                if let Some(code) = child.try_wait()? {
                    break code;
                }
                thread::sleep(self.slice(started, timeout));
            } else {
                state.transition_to(ExecState::Streaming)?;
                let slice = self.slice(started, timeout);
                let ready = match child.wait_ready(&active, stdin.is_some(), slice) {
                    Ok(ready) => ready,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => Ready::default(),
                    Err(e) => return Err(e.into()),
                };
                if ready.stdin {
                    if let Some(feed) = stdin.as_mut() {
                        if feed_stdin(child.as_mut(), feed)? {
                            child.close_stdin();
                            stdin = None;
                        }
                    }
                }
                for source in ready.streams {
                    let capture = match source {
                        OutputSource::Stdout => stdout.as_mut(),
                        OutputSource::Stderr => stderr.as_mut(),
                    };
                    if let Some(capture) = capture {
                        self.read_ready(
                            child.as_mut(),
                            capture,
                            &mut buf,
                            command.verbose,
                            deadline,
                        )?;
                    }
                }
            }

            if let Some(limit) = timeout {
                let elapsed = started.elapsed();
                if elapsed > limit {
                    state.transition_to(ExecState::TimedOut)?;
                    self.stop(child.as_mut());
                    for capture in [stdout.as_mut(), stderr.as_mut()].into_iter().flatten() {
                        discard_pending(child.as_mut(), capture, &mut buf);
                    }
                    tracing::warn!(
                        elapsed = ?elapsed,
                        "Wait for {:?} during {:?}: no return code, child killed",
                        masked,
                        limit
                    );
                    return Err(ExecError::Timeout {
                        command: masked.to_string(),
                        elapsed: started.elapsed(),
                    });
                }
            }
        };

        state.transition_to(ExecState::Completed)?;
        log_at!(
            command.verbose,
            "Command exit code '{}':\n{}\n",
            exit_code,
            masked
        );

        let mut result = ExecResult::new(masked)
            .with_stdout(stdout.map(|capture| capture.lines))
            .with_stderr(stderr.map(|capture| capture.lines))
            .with_exit_code(exit_code)
            .with_duration(started.elapsed());
        if let Some(data) = &command.stdin {
            result = result.with_stdin(data);
        }
        Ok(result)
    }

    /// Next poll wait: one slice, cut short by the deadline.
    fn slice(&self, started: Instant, timeout: Option<Duration>) -> Duration {
        match timeout {
            Some(limit) => self
                .settings
                .poll_interval
                .min(limit.saturating_sub(started.elapsed())),
            None => self.settings.poll_interval,
        }
    }

    /// Read a ready stream until it would block, reaches EOF, or the
    /// per-wake read cap is hit.
    fn read_ready(
        &self,
        child: &mut dyn ChildProcess,
        capture: &mut Capture,
        buf: &mut [u8],
        verbose: bool,
        deadline: Option<Instant>,
    ) -> io::Result<()> {
        let mut reads = 0;
        while reads < MAX_READS_PER_WAKE {
            match child.read(capture.source, buf) {
                Ok(0) => {
                    capture.open = false;
                    if let Some(line) = capture.buffer.finish() {
                        self.emit(capture, line, verbose, deadline);
                    }
                    return Ok(());
                }
                Ok(n) => {
                    reads += 1;
                    for line in capture.buffer.push(&buf[..n]) {
                        self.emit(capture, line, verbose, deadline);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn emit(
        &self,
        capture: &mut Capture,
        line: Vec<u8>,
        verbose: bool,
        deadline: Option<Instant>,
    ) {
        log_at!(
            verbose,
            stream = %capture.source,
            "{}",
            String::from_utf8_lossy(&line)
        );
        if let Some(sink) = self.sink {
            forward(sink, OutputLine::new(line.clone(), capture.source), deadline);
        }
        capture.lines.push(line);
    }

    /// SIGTERM, wait out the grace window, then SIGKILL.
    fn stop(&self, child: &mut dyn ChildProcess) {
        if let Err(e) = self.try_stop(child) {
            tracing::error!(pid = ?child.id(), error = %e, "failed to stop child");
        }
    }

    fn try_stop(&self, child: &mut dyn ChildProcess) -> io::Result<()> {
        child.terminate()?;
        if wait_exit(child, self.settings.kill_grace)?.is_some() {
            return Ok(());
        }
        tracing::warn!(
            pid = ?child.id(),
            grace = ?self.settings.kill_grace,
            "child ignored SIGTERM, sending SIGKILL"
        );
        child.kill()?;
        if wait_exit(child, self.settings.kill_grace)?.is_none() {
            tracing::warn!(pid = ?child.id(), "child not reaped after SIGKILL");
        }
        Ok(())
    }
}

/// Write as much of the payload as stdin accepts right now.
///
/// Returns `true` once stdin should be closed: the payload is fully written
/// or the child stopped reading.
fn feed_stdin(child: &mut dyn ChildProcess, feed: &mut StdinFeed<'_>) -> io::Result<bool> {
    while !feed.done() {
        match child.write_stdin(&feed.data[feed.written..]) {
            Ok(0) => return Ok(false),
            Ok(n) => feed.written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                tracing::debug!(
                    written = feed.written,
                    total = feed.data.len(),
                    "child closed stdin before reading all input"
                );
                return Ok(true);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Hand a line to the sink, retrying on a full channel until `deadline`.
fn forward(sink: &mpsc::Sender<OutputLine>, line: OutputLine, deadline: Option<Instant>) {
    let mut line = line;
    loop {
        match sink.try_send(line) {
            Ok(()) | Err(TrySendError::Closed(_)) => return,
            Err(TrySendError::Full(back)) => {
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    tracing::debug!(
                        stream = %back.source,
                        "line sink full past deadline, line not forwarded"
                    );
                    return;
                }
                line = back;
                thread::sleep(SINK_RETRY);
            }
        }
    }
}

/// Poll for an exit status for at most `within`.
fn wait_exit(child: &mut dyn ChildProcess, within: Duration) -> io::Result<Option<i32>> {
    let deadline = Instant::now() + within;
    loop {
        if let Some(code) = child.try_wait()? {
            return Ok(Some(code));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(REAP_TICK.min(deadline - now));
    }
}

/// Read whatever is immediately available and throw it away.
fn discard_pending(child: &mut dyn ChildProcess, capture: &mut Capture, buf: &mut [u8]) {
    let mut discarded = 0usize;
    for _ in 0..MAX_READS_PER_WAKE {
        if !capture.open {
            break;
        }
        match child.read(capture.source, buf) {
            Ok(0) => capture.open = false,
            Ok(n) => discarded += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    tracing::trace!(stream = %capture.source, discarded, "dropped output of killed child");
}
