//! Command execution engine.
//!
//! This module provides:
//! - The [`Command`] description and the [`ExecResult`] it produces
//! - Secret masking of command text
//! - The [`Spawner`] / [`ChildProcess`] backend capability
//! - The [`ExecutionLoop`] multiplexing stdout/stderr under a deadline
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(unix)]
//! # fn main() -> exec_runner::Result<()> {
//! use std::time::Duration;
//! use exec_runner::execution::{Command, EngineSettings, ExecutionLoop, LocalSpawner};
//!
//! let spawner = LocalSpawner::new();
//! let engine = ExecutionLoop::new(&spawner, EngineSettings::default());
//! let command = Command::new("uname -a").verbose(true);
//! let result = engine.run(&command, "uname -a", Some(Duration::from_secs(5)))?;
//! println!("{}", result.stdout_str());
//! # Ok(())
//! # }
//! # #[cfg(not(unix))]
//! # fn main() {}
//! ```

mod command;
mod engine;
#[cfg(unix)]
mod local;
mod mask;
mod result;
pub(crate) mod spawner;
mod state;

pub use command::{Command, CommandLine};
pub use engine::{
    EngineSettings, ExecutionLoop, DEFAULT_KILL_GRACE, DEFAULT_POLL_INTERVAL,
    DEFAULT_READ_BUFFER_SIZE,
};
#[cfg(unix)]
pub use local::{exit_code, LocalChild, LocalSpawner, SHELL};
pub use mask::{mask, mask_command, MASK_PLACEHOLDER};
pub use result::{ExecResult, OutputLine, OutputSource};
pub use spawner::{ChildProcess, SpawnRequest, Spawner};
pub use state::ExecState;
