//! Error types for exec-runner.

use std::time::Duration;

use thiserror::Error;

use crate::execution::{ExecResult, ExecState};

/// Main error type for command execution.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The child process could not be started.
    #[error("failed to spawn {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error while driving the child process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Deadline exceeded; the child was killed and no result was produced.
    #[error("command {command:?} timed out after {:.3}s", .elapsed.as_secs_f64())]
    Timeout { command: String, elapsed: Duration },

    /// The child exited with a code outside the accepted set.
    #[error(
        "Command {:?} returned exit code {} while expected {:?}\n\tSTDOUT:\n{}\n\tSTDERR:\n{}",
        .result.command(),
        display_code(.result.exit_code()),
        .expected,
        .result.stdout_brief(),
        .result.stderr_brief()
    )]
    CalledProcess {
        result: Box<ExecResult>,
        expected: Vec<i32>,
    },

    /// The child exited acceptably but wrote to stderr.
    #[error(
        "Command {:?} produced unexpected STDERR (exit code {})\n\tSTDERR:\n{}",
        .result.command(),
        display_code(.result.exit_code()),
        .result.stderr_brief()
    )]
    UnexpectedStderr { result: Box<ExecResult> },

    /// Execution state machine was driven out of order.
    #[error("invalid execution state transition from {from:?} to {to:?}")]
    InvalidStateTransition { from: ExecState, to: ExecState },

    /// Stdout could not be parsed in the requested format.
    #[error("{command}: stdout is not valid {format}: {details}")]
    Deserialize {
        command: String,
        format: &'static str,
        details: String,
    },

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,
}

fn display_code(code: Option<i32>) -> String {
    code.map_or_else(|| "<none>".to_string(), |c| c.to_string())
}

impl ExecError {
    /// The execution result attached to this error, if any.
    pub fn result(&self) -> Option<&ExecResult> {
        match self {
            Self::CalledProcess { result, .. } | Self::UnexpectedStderr { result } => {
                Some(result.as_ref())
            }
            _ => None,
        }
    }

    /// Exit code of the failed command, if it ran to completion.
    pub fn exit_code(&self) -> Option<i32> {
        self.result().and_then(ExecResult::exit_code)
    }

    /// The (masked) command text this error refers to.
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Spawn { command, .. }
            | Self::Timeout { command, .. }
            | Self::Deserialize { command, .. } => Some(command.as_str()),
            Self::CalledProcess { result, .. } | Self::UnexpectedStderr { result } => {
                Some(result.command())
            }
            _ => None,
        }
    }

    /// Whether this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Convenience Result type for exec-runner operations.
pub type Result<T> = std::result::Result<T, ExecError>;
