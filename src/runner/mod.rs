//! Serialized command runner.
//!
//! A [`Runner`] owns a spawner, a default masking pattern and the engine
//! tunables, and lets at most one execution run at a time. Independent
//! runners execute in parallel.

mod check;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, RunnerConfig};
use crate::execution::{
    mask_command, Command, EngineSettings, ExecResult, ExecutionLoop, OutputLine, Spawner,
};
use crate::logging::log_at;
use crate::Result;

pub use check::CheckOptions;

/// Capacity of the line channel returned by [`Runner::execute_streaming`].
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Runs commands one at a time through a [`Spawner`].
pub struct Runner {
    spawner: Box<dyn Spawner>,
    mask: Option<Regex>,
    default_timeout: Option<Duration>,
    settings: EngineSettings,
    lock: Mutex<()>,
}

impl Runner {
    /// Create a runner over the given spawner with default settings.
    pub fn with_spawner(spawner: impl Spawner + 'static) -> Self {
        Self {
            spawner: Box::new(spawner),
            mask: None,
            default_timeout: None,
            settings: EngineSettings::default(),
            lock: Mutex::new(()),
        }
    }

    /// Create a runner over `spawner` configured from `config`.
    pub fn with_config(
        spawner: impl Spawner + 'static,
        config: &RunnerConfig,
    ) -> std::result::Result<Self, ConfigError> {
        let mut runner = Self::with_spawner(spawner);
        runner.mask = config.compile_mask()?;
        runner.default_timeout = config.default_timeout();
        runner.settings = config.engine_settings();
        Ok(runner)
    }

    /// Create a runner for the local machine.
    #[cfg(unix)]
    pub fn local() -> Self {
        Self::with_spawner(crate::execution::LocalSpawner::new())
    }

    /// Create a local runner configured from `config`.
    #[cfg(unix)]
    pub fn from_config(config: &RunnerConfig) -> std::result::Result<Self, ConfigError> {
        Self::with_config(crate::execution::LocalSpawner::new(), config)
    }

    /// Set the masking pattern applied to every command.
    pub fn mask_pattern(mut self, pattern: Regex) -> Self {
        self.mask = Some(pattern);
        self
    }

    /// Set the timeout used by commands without their own.
    pub fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the wait between SIGTERM and SIGKILL on timeout.
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.settings.kill_grace = grace;
        self
    }

    /// Set the readiness-poll slice.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.settings.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Engine tunables in effect.
    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Mask `command` with the runner pattern, then its own pattern.
    pub fn masked_command(&self, command: &Command) -> String {
        mask_command(
            &command.line.display_text(),
            &[self.mask.as_ref(), command.mask.as_ref()],
        )
    }

    /// Run a command and return its result, whatever the exit code.
    ///
    /// Blocks while another execution on this runner is in flight.
    pub fn execute(&self, command: &Command) -> Result<ExecResult> {
        let _guard = self.lock();
        self.execute_locked(command, None)
    }

    /// Run a command and fail unless its exit code is expected.
    pub fn check_call(&self, command: &Command, options: &CheckOptions) -> Result<ExecResult> {
        let _guard = self.lock();
        self.check_call_locked(command, options)
    }

    /// Like [`check_call`](Self::check_call), and also fail if the command
    /// wrote anything to stderr.
    pub fn check_stderr(&self, command: &Command, options: &CheckOptions) -> Result<ExecResult> {
        let _guard = self.lock();
        self.check_stderr_locked(command, options)
    }

    /// Hold the runner for several commands in a row.
    ///
    /// No other caller can execute on this runner until the returned
    /// [`Batch`] is dropped. Calling [`execute`](Self::execute) on the same
    /// runner from the holding thread deadlocks; use the batch methods.
    pub fn batch(&self) -> Batch<'_> {
        Batch {
            runner: self,
            _guard: self.lock(),
        }
    }

    /// Run a command on a tokio blocking thread.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_execute(self: &Arc<Self>, command: Command) -> JoinHandle<Result<ExecResult>> {
        let runner = Arc::clone(self);
        tokio::task::spawn_blocking(move || runner.execute(&command))
    }

    /// Run a command on a tokio blocking thread, streaming each captured
    /// line as it arrives.
    ///
    /// The channel closes when the command finishes. Dropping the receiver
    /// does not stop the command. A receiver that is not drained delays the
    /// command only until its deadline, after which lines are no longer
    /// forwarded; the result still holds every line. Must be called from
    /// within a tokio runtime.
    pub fn execute_streaming(
        self: &Arc<Self>,
        command: Command,
    ) -> (
        mpsc::Receiver<OutputLine>,
        JoinHandle<Result<ExecResult>>,
    ) {
        let (tx, rx) = mpsc::channel::<OutputLine>(STREAM_CHANNEL_CAPACITY);
        let runner = Arc::clone(self);
        let handle = tokio::task::spawn_blocking(move || {
            let _guard = runner.lock();
            runner.execute_locked(&command, Some(&tx))
        });
        (rx, handle)
    }

    /// The mutex guards no data, so a panic while holding it leaves nothing
    /// inconsistent.
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn execute_locked(
        &self,
        command: &Command,
        sink: Option<&mpsc::Sender<OutputLine>>,
    ) -> Result<ExecResult> {
        let masked = self.masked_command(command);
        log_at!(command.verbose, "Executing command:\n{}\n", masked);

        let timeout = command.timeout.or(self.default_timeout);
        let mut engine = ExecutionLoop::new(self.spawner.as_ref(), self.settings);
        if let Some(sink) = sink {
            engine = engine.with_sink(sink);
        }
        engine.run(command, &masked, timeout)
    }

    fn check_call_locked(&self, command: &Command, options: &CheckOptions) -> Result<ExecResult> {
        let result = self.execute_locked(command, None)?;
        check::exit_code(result, options)
    }

    fn check_stderr_locked(&self, command: &Command, options: &CheckOptions) -> Result<ExecResult> {
        let result = self.check_call_locked(command, options)?;
        check::no_stderr(result, options)
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("mask", &self.mask.as_ref().map(Regex::as_str))
            .field("default_timeout", &self.default_timeout)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Exclusive hold on a [`Runner`], see [`Runner::batch`].
pub struct Batch<'a> {
    runner: &'a Runner,
    _guard: MutexGuard<'a, ()>,
}

impl Batch<'_> {
    /// See [`Runner::execute`].
    pub fn execute(&self, command: &Command) -> Result<ExecResult> {
        self.runner.execute_locked(command, None)
    }

    /// See [`Runner::check_call`].
    pub fn check_call(&self, command: &Command, options: &CheckOptions) -> Result<ExecResult> {
        self.runner.check_call_locked(command, options)
    }

    /// See [`Runner::check_stderr`].
    pub fn check_stderr(&self, command: &Command, options: &CheckOptions) -> Result<ExecResult> {
        self.runner.check_stderr_locked(command, options)
    }
}
