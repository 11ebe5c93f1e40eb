//! Process spawner capability.
//!
//! The execution loop only talks to a child process through these traits, so
//! a local backend, a remote transport or a scripted fake can all drive it.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::time::Duration;

use super::command::CommandLine;
use super::result::OutputSource;

/// Everything a backend needs to start one child process.
#[derive(Debug, Clone, Copy)]
pub struct SpawnRequest<'a> {
    /// Program to run, unmasked.
    pub line: &'a CommandLine,
    /// Working directory override.
    pub cwd: Option<&'a Path>,
    /// Environment overlay.
    pub env: &'a HashMap<String, String>,
    /// Pipe stdout (otherwise discard it).
    pub open_stdout: bool,
    /// Pipe stderr (otherwise discard it).
    pub open_stderr: bool,
}

/// Starts child processes.
pub trait Spawner: Send + Sync {
    /// Spawn a child with stdin piped and the output streams wired per
    /// `request`. Stdin and opened output pipes must be non-blocking.
    fn spawn(&self, request: &SpawnRequest<'_>) -> io::Result<Box<dyn ChildProcess>>;
}

/// Readiness reported by [`ChildProcess::wait_ready`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ready {
    /// Output streams with data or end-of-stream.
    pub streams: Vec<OutputSource>,
    /// Stdin accepts more bytes, or writing to it will fail right away.
    pub stdin: bool,
}

/// A running child as seen by the execution loop.
///
/// Dropping an unreaped child must kill and reap it; the loop relies on this
/// when it bails out early with an error.
pub trait ChildProcess: Send {
    /// OS process id, when there is one.
    fn id(&self) -> Option<u32>;

    /// Non-blocking write to stdin. Returns the bytes accepted; `WouldBlock`
    /// means the pipe is full, `BrokenPipe` that the child closed it.
    fn write_stdin(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Close stdin so the child sees end-of-file. Idempotent.
    fn close_stdin(&mut self);

    /// Wait at most `timeout` for any of `streams` to become readable (data
    /// or end-of-stream), or, with `stdin` set, for stdin to become
    /// writable. Returns what is ready, possibly nothing.
    fn wait_ready(
        &mut self,
        streams: &[OutputSource],
        stdin: bool,
        timeout: Duration,
    ) -> io::Result<Ready>;

    /// Non-blocking read. `Ok(0)` is end-of-stream; `WouldBlock` means no
    /// data right now.
    fn read(&mut self, stream: OutputSource, buf: &mut [u8]) -> io::Result<usize>;

    /// Exit code if the child has exited. Death by signal `N` reports `-N`.
    fn try_wait(&mut self) -> io::Result<Option<i32>>;

    /// Ask the child to stop (SIGTERM).
    fn terminate(&mut self) -> io::Result<()>;

    /// Stop the child unconditionally (SIGKILL).
    fn kill(&mut self) -> io::Result<()>;
}
