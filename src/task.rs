//! The schedulable unit and its lifecycle bookkeeping.
//!
//! A [`TaskItem`] is created by one of the `add_*` registration calls, lives
//! in exactly one container at a time (a deadline index, the event queue,
//! the ready queue, or the arena freelist), and is recycled to the arena
//! once its callback has run or it has been cancelled. Callers hold a
//! [`TaskRef`], a generation-checked handle that goes stale the moment the
//! underlying slot is recycled, so a reference kept past the item's life is
//! detected instead of silently acting on an unrelated task.

use std::fmt;
use std::os::unix::io::RawFd;

use crate::deadline::Deadline;
use crate::scheduler::Scheduler;

/// The callback bound to a task. It runs at most once, on the scheduler
/// thread, and receives the scheduler itself so it can register follow-up
/// work. Its argument is whatever the closure captured.
pub type Callback = Box<dyn FnOnce(&mut Scheduler, Activation) + 'static>;

/// What a task currently is.
///
/// `Read`/`Write`/`Timer`/`TimerShutdown`/`Child` are waiting states; the
/// remaining variants describe how a dispatched item became runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Waiting for read readiness on a descriptor.
    Read,
    /// Waiting for write readiness on a descriptor.
    Write,
    /// Waiting for a deadline.
    Timer,
    /// A timer that keeps running through shutdown; holds the loop open
    /// until it fires or is cancelled.
    TimerShutdown,
    /// Waiting for a child process to exit.
    Child,
    /// Enqueued directly for immediate dispatch.
    Event,
    /// A timer whose deadline was reached.
    Ready,
    /// A descriptor that became readable or writable.
    ReadyFd,
    /// A read task whose deadline passed without readiness.
    ReadTimeout,
    /// A write task whose deadline passed without readiness.
    WriteTimeout,
    /// Hang-up or error reported while waiting for read readiness.
    ReadError,
    /// Hang-up or error reported while waiting for write readiness.
    WriteError,
    /// A child watch whose deadline passed before the child exited.
    ChildTimeout,
    /// A watched child exited; the wait status is in the payload.
    ChildTerminated,
    /// Begins the shutdown phase once its callback has run.
    TerminateStart,
    /// Ends the dispatch loop.
    Terminate,
    /// Recycled slot; never observed by callbacks.
    Unused,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Read => "READ",
            TaskKind::Write => "WRITE",
            TaskKind::Timer => "TIMER",
            TaskKind::TimerShutdown => "TIMER_SHUTDOWN",
            TaskKind::Child => "CHILD",
            TaskKind::Event => "EVENT",
            TaskKind::Ready => "READY",
            TaskKind::ReadyFd => "READY_FD",
            TaskKind::ReadTimeout => "READ_TIMEOUT",
            TaskKind::WriteTimeout => "WRITE_TIMEOUT",
            TaskKind::ReadError => "READ_ERROR",
            TaskKind::WriteError => "WRITE_ERROR",
            TaskKind::ChildTimeout => "CHILD_TIMEOUT",
            TaskKind::ChildTerminated => "CHILD_TERMINATED",
            TaskKind::TerminateStart => "TERMINATE_START",
            TaskKind::Terminate => "TERMINATE",
            TaskKind::Unused => "UNUSED",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type-specific data carried by a task and handed to its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    None,
    /// Descriptor tasks. `close_on_cleanup` asks the scheduler to close the
    /// descriptor when the task is torn down with the scheduler itself.
    Fd { fd: RawFd, close_on_cleanup: bool },
    /// Child watches. `status` holds the wait status once the child exited.
    Child { pid: libc::pid_t, status: libc::c_int },
    /// Free-form value for timer and event tasks.
    Value(i64),
}

impl Payload {
    pub fn fd(&self) -> Option<RawFd> {
        match self {
            Payload::Fd { fd, .. } => Some(*fd),
            _ => None,
        }
    }

    pub fn pid(&self) -> Option<libc::pid_t> {
        match self {
            Payload::Child { pid, .. } => Some(*pid),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<libc::c_int> {
        match self {
            Payload::Child { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<i64> {
        match self {
            Payload::Value(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::None => write!(f, "-"),
            Payload::Fd { fd, .. } => write!(f, "fd {fd}"),
            Payload::Child { pid, status } => write!(f, "pid {pid} status {status}"),
            Payload::Value(v) => write!(f, "val {v}"),
        }
    }
}

/// Snapshot of a task handed to its callback when it runs.
#[derive(Debug, Clone, Copy)]
pub struct Activation {
    /// Why the task became runnable ([`TaskKind::ReadyFd`],
    /// [`TaskKind::ReadTimeout`], [`TaskKind::ChildTerminated`], ...).
    pub kind: TaskKind,
    /// The task's sequence number, unique for the scheduler's lifetime.
    pub id: u64,
    pub payload: Payload,
}

/// Which of the four deadline indices an item is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexKind {
    Read,
    Write,
    Timer,
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueKind {
    Event,
    Ready,
}

/// Where an item currently lives. Exactly one container holds an item at
/// any time; `Dispatching` covers the window between being popped from a
/// queue and being recycled, so a callback cancelling its own handle is a
/// detectable no-op rather than a double recycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Container {
    Arena,
    Index(IndexKind),
    Queue(QueueKind),
    Dispatching,
}

/// Handle to a scheduled task.
///
/// Cheap to copy and safe to keep: once the task has run or been
/// cancelled, the handle is stale and every operation on it is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

pub(crate) struct TaskItem {
    pub(crate) kind: TaskKind,
    pub(crate) seq: u64,
    pub(crate) deadline: Deadline,
    pub(crate) payload: Payload,
    pub(crate) callback: Option<Callback>,
    pub(crate) container: Container,
}
