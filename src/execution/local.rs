//! Local process backend built on `std::process` and `poll(2)`.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, ExitStatus, Stdio};
use std::time::Duration;

use super::command::CommandLine;
use super::result::OutputSource;
use super::spawner::{ChildProcess, Ready, SpawnRequest, Spawner};

/// Shell used for [`CommandLine::Shell`] commands.
pub const SHELL: &str = "/bin/sh";

/// Spawns commands on the local machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSpawner;

impl LocalSpawner {
    /// Create a new local spawner.
    pub fn new() -> Self {
        Self
    }

    fn build(request: &SpawnRequest<'_>) -> io::Result<std::process::Command> {
        let mut cmd = match request.line {
            CommandLine::Shell(text) => {
                let mut c = std::process::Command::new(SHELL);
                c.arg("-c").arg(text);
                c
            }
            CommandLine::Argv(args) => {
                let (program, rest) = args.split_first().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "empty argument vector")
                })?;
                let mut c = std::process::Command::new(program);
                c.args(rest);
                c
            }
        };

        if let Some(dir) = request.cwd {
            cmd.current_dir(dir);
        }
        cmd.envs(request.env);

        // Own process group, so signals reach everything the command forks.
        cmd.process_group(0);
        cmd.stdin(Stdio::piped());
        cmd.stdout(pipe_or_null(request.open_stdout));
        cmd.stderr(pipe_or_null(request.open_stderr));
        Ok(cmd)
    }
}

fn pipe_or_null(open: bool) -> Stdio {
    if open {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}

impl Spawner for LocalSpawner {
    fn spawn(&self, request: &SpawnRequest<'_>) -> io::Result<Box<dyn ChildProcess>> {
        let mut child = Self::build(request)?.spawn()?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let local = LocalChild {
            child,
            stdin,
            stdout,
            stderr,
            reaped: false,
        };
        // On failure `local` is dropped, which kills and reaps the child.
        if let Some(pipe) = &local.stdin {
            set_nonblocking(pipe.as_raw_fd())?;
        }
        if let Some(pipe) = &local.stdout {
            set_nonblocking(pipe.as_raw_fd())?;
        }
        if let Some(pipe) = &local.stderr {
            set_nonblocking(pipe.as_raw_fd())?;
        }
        Ok(Box::new(local))
    }
}

/// A child process spawned by [`LocalSpawner`].
pub struct LocalChild {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    reaped: bool,
}

impl LocalChild {
    fn fd(&self, stream: OutputSource) -> Option<RawFd> {
        match stream {
            OutputSource::Stdout => self.stdout.as_ref().map(AsRawFd::as_raw_fd),
            OutputSource::Stderr => self.stderr.as_ref().map(AsRawFd::as_raw_fd),
        }
    }

    /// Signal the child's whole process group.
    fn signal(&self, signal: libc::c_int) -> io::Result<()> {
        let pgid = libc::pid_t::try_from(self.child.id())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "pid out of range"))?;
        // SAFETY: kill(2) takes plain integers. The group id is our child's
        // pid, which cannot be recycled while the child is unreaped or while
        // any member of its group is alive.
        let rc = unsafe { libc::kill(-pgid, signal) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(err)
    }
}

impl ChildProcess for LocalChild {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn write_stdin(&mut self, data: &[u8]) -> io::Result<usize> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stdin closed"))?;
        stdin.write(data)
    }

    fn close_stdin(&mut self) {
        self.stdin = None;
    }

    fn wait_ready(
        &mut self,
        streams: &[OutputSource],
        stdin: bool,
        timeout: Duration,
    ) -> io::Result<Ready> {
        let mut watched = Vec::with_capacity(streams.len());
        let mut fds = Vec::with_capacity(streams.len() + 1);
        for &stream in streams {
            if let Some(fd) = self.fd(stream) {
                watched.push(stream);
                fds.push(libc::pollfd {
                    fd,
                    events: libc::POLLIN,
                    revents: 0,
                });
            }
        }
        let stdin_fd = self.stdin.as_ref().filter(|_| stdin).map(AsRawFd::as_raw_fd);
        if let Some(fd) = stdin_fd {
            fds.push(libc::pollfd {
                fd,
                events: libc::POLLOUT,
                revents: 0,
            });
        }

        let timeout_ms = poll_timeout_ms(timeout);
        // SAFETY: `fds` is a live, correctly sized buffer of pollfd structs
        // for descriptors owned by this child.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Ready::default());
            }
            return Err(err);
        }

        let ready_mask = libc::POLLHUP | libc::POLLERR;
        let stdin_ready = stdin_fd.is_some()
            && fds
                .last()
                .is_some_and(|pfd| pfd.revents & (libc::POLLOUT | ready_mask) != 0);
        let streams = watched
            .into_iter()
            .zip(&fds)
            .filter(|(_, pfd)| pfd.revents & (libc::POLLIN | ready_mask) != 0)
            .map(|(stream, _)| stream)
            .collect();
        Ok(Ready {
            streams,
            stdin: stdin_ready,
        })
    }

    fn read(&mut self, stream: OutputSource, buf: &mut [u8]) -> io::Result<usize> {
        let not_open = || io::Error::new(io::ErrorKind::NotConnected, "stream not opened");
        match stream {
            OutputSource::Stdout => self.stdout.as_mut().ok_or_else(not_open)?.read(buf),
            OutputSource::Stderr => self.stderr.as_mut().ok_or_else(not_open)?.read(buf),
        }
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status.map(exit_code))
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.signal(libc::SIGTERM)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.signal(libc::SIGKILL)
    }
}

impl Drop for LocalChild {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Ok(None) = self.child.try_wait() {
            let _ = self.signal(libc::SIGKILL);
            let _ = self.child.wait();
        }
    }
}

/// Exit code of a finished process; death by signal `N` maps to `-N`.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1)
}

/// Round a poll slice up to whole milliseconds so short waits still block.
fn poll_timeout_ms(timeout: Duration) -> libc::c_int {
    let mut ms = timeout.as_millis();
    if timeout.subsec_nanos() % 1_000_000 != 0 {
        ms += 1;
    }
    libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: `fd` is an open pipe descriptor owned by the caller.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above; only the status flags are changed.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
