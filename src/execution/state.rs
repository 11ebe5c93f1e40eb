//! Execution state machine.

/// Lifecycle state of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecState {
    /// Nothing spawned yet.
    #[default]
    Idle,
    /// Child started, stdin handled.
    Spawned,
    /// Reading from at least one open output pipe.
    Streaming,
    /// Pipes drained, waiting for the exit status.
    Polling,
    /// Child exited and was reaped.
    Completed,
    /// Deadline exceeded; child killed.
    TimedOut,
}

impl ExecState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - Idle -> Spawned
    /// - Spawned -> Streaming | Polling
    /// - Streaming <-> Polling
    /// - Streaming | Polling -> Completed | TimedOut
    pub fn can_transition_to(&self, target: ExecState) -> bool {
        use ExecState::*;
        matches!(
            (*self, target),
            (Idle, Spawned)
                | (Spawned, Streaming)
                | (Spawned, Polling)
                | (Streaming, Polling)
                | (Polling, Streaming)
                | (Streaming, Completed)
                | (Polling, Completed)
                | (Streaming, TimedOut)
                | (Polling, TimedOut)
        )
    }

    /// Attempt to transition to a new state.
    ///
    /// Moving to the current state is a no-op.
    pub fn transition_to(&mut self, target: ExecState) -> crate::Result<()> {
        if *self == target {
            return Ok(());
        }
        if self.can_transition_to(target) {
            tracing::trace!(from = ?*self, to = ?target, "execution state");
            *self = target;
            Ok(())
        } else {
            Err(crate::error::ExecError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecState::Completed | ExecState::TimedOut)
    }

    /// Whether a child process is alive in this state.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ExecState::Spawned | ExecState::Streaming | ExecState::Polling
        )
    }
}
