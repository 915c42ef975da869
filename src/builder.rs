//! Fluent builder for Scheduler construction.

use crate::error::Result;
use crate::scheduler::{ChildExitPolicy, Scheduler};

/// Builder for constructing [`Scheduler`] instances.
///
/// # Example
/// ```ignore
/// let sched = SchedulerBuilder::new()
///     .arena_capacity(128)
///     .child_exit_policy(|_pid, status| {
///         libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 2
///     })
///     .build()?;
/// ```
pub struct SchedulerBuilder {
    pub(crate) arena_capacity: usize,
    pub(crate) child_exit_policy: Option<ChildExitPolicy>,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            arena_capacity: 32,
            child_exit_policy: None,
        }
    }

    /// Pre-sizes the task arena. Purely a pre-allocation hint; the arena
    /// grows on demand either way.
    pub fn arena_capacity(mut self, capacity: usize) -> Self {
        self.arena_capacity = capacity;
        self
    }

    /// Installs the policy deciding whether a watched child's exit status
    /// is a permanent failure. A permanent failure terminates the whole
    /// dispatch loop instead of reporting the exit to the watcher. Without
    /// a policy no exit is treated as permanent.
    pub fn child_exit_policy<F>(mut self, policy: F) -> Self
    where
        F: FnMut(libc::pid_t, libc::c_int) -> bool + 'static,
    {
        self.child_exit_policy = Some(Box::new(policy));
        self
    }

    /// Builds the scheduler: creates the epoll instance, the countdown
    /// timerfd and the SIGCHLD signalfd, and registers the internal tasks
    /// serving the latter two.
    pub fn build(self) -> Result<Scheduler> {
        Scheduler::from_builder(self)
    }
}
