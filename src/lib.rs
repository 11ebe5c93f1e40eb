//! # exec-runner
//!
//! Run external commands and capture their output line by line.
//!
//! A [`Runner`] spawns a child process, streams its stdout and stderr without
//! blocking on either pipe, enforces an optional wall-clock deadline (SIGTERM,
//! then SIGKILL), masks secrets in everything it logs or returns, and hands
//! back an [`ExecResult`].
//!
//! ## Features
//!
//! - **Non-blocking capture**: both pipes are multiplexed with a bounded
//!   readiness poll, so a child filling one pipe never stalls the other
//! - **Deadlines**: timed-out children are terminated and reaped
//! - **Secret masking**: regex capture groups are replaced before logging
//! - **Serialization**: one execution at a time per runner
//! - **Async adapter**: run on a tokio blocking thread, optionally streaming lines
//!
//! ## Quick Start
//!
//! ```no_run
//! # #[cfg(unix)]
//! # fn main() -> exec_runner::Result<()> {
//! use exec_runner::{CheckOptions, Command, Runner};
//!
//! exec_runner::logging::try_init().ok();
//!
//! let runner = Runner::local();
//! let result = runner.check_call(
//!     &Command::new("ls -la /tmp").verbose(true),
//!     &CheckOptions::default(),
//! )?;
//! println!("{}", result.stdout_str());
//! # Ok(())
//! # }
//! # #[cfg(not(unix))]
//! # fn main() {}
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod registry;
pub mod runner;

// Re-export commonly used types
pub use config::{ConfigError, RunnerConfig};
pub use error::{ExecError, Result};
pub use execution::{Command, CommandLine, ExecResult, OutputLine, OutputSource};
pub use registry::RunnerRegistry;
pub use runner::{Batch, CheckOptions, Runner};
