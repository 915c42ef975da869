//! The scheduler context: state, construction and teardown.
//!
//! A [`Scheduler`] owns everything the dispatch loop touches: the four
//! deadline indices, the pid index, the event and ready queues, the task
//! arena, the epoll poller and the timerfd/signalfd handles. It is an
//! owned context rather than a process-wide singleton, so tests can run
//! several independent instances side by side. All of it is mutated from
//! a single thread; the type is deliberately neither `Send` nor `Sync`.

mod cancel;
mod child;
mod dispatch;
mod dump;
mod register;

use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use std::os::unix::io::RawFd;

use tracing::debug;

use crate::builder::SchedulerBuilder;
use crate::deadline::DeadlineQueue;
use crate::error::Result;
use crate::reactor::event::{EventRecord, Interest};
use crate::reactor::poller::Poller;
use crate::reactor::signalfd::SignalFd;
use crate::reactor::timerfd::CountdownTimer;
use crate::task::{IndexKind, Payload, TaskRef};
use crate::utils::arena::Arena;

/// Decides whether a child's exit status is a permanent failure. Returning
/// `true` turns the exit into a program-wide terminate event instead of a
/// [`ChildTerminated`](crate::TaskKind::ChildTerminated) dispatch.
pub(crate) type ChildExitPolicy = Box<dyn FnMut(libc::pid_t, libc::c_int) -> bool + 'static>;

/// Single-threaded readiness- and timer-driven task scheduler.
///
/// Work is registered through the `add_*` calls, each returning an opaque
/// [`TaskRef`]. The [`run`](Scheduler::run) loop then multiplexes
/// descriptor readiness, deadlines and child exits into one ordered
/// sequence of callback invocations.
///
/// # Example
/// ```ignore
/// let mut sched = Scheduler::new()?;
/// sched.add_timer(Some(Duration::from_secs(1)), |_, _| {
///     println!("one second later");
/// });
/// sched.add_terminate_event();
/// sched.run();
/// ```
pub struct Scheduler {
    pub(crate) arena: Arena,

    pub(crate) read: DeadlineQueue,
    pub(crate) write: DeadlineQueue,
    pub(crate) timer: DeadlineQueue,
    pub(crate) child: DeadlineQueue,
    pub(crate) child_pid: BTreeMap<libc::pid_t, TaskRef>,

    pub(crate) records: BTreeMap<RawFd, EventRecord>,
    pub(crate) event_queue: VecDeque<TaskRef>,
    pub(crate) ready_queue: VecDeque<TaskRef>,

    pub(crate) poller: Poller,
    pub(crate) countdown: CountdownTimer,
    pub(crate) signals: SignalFd,
    pub(crate) countdown_fd: RawFd,
    pub(crate) signal_fd: RawFd,

    pub(crate) next_seq: u64,
    pub(crate) shutting_down: bool,
    pub(crate) shutdown_timer_running: bool,
    pub(crate) child_exit_policy: Option<ChildExitPolicy>,
    pub(crate) last_wait_errno: Option<i32>,

    _not_send: PhantomData<*const ()>,
}

impl Scheduler {
    /// Creates a scheduler with default settings. See [`SchedulerBuilder`]
    /// for the configurable variant.
    pub fn new() -> Result<Self> {
        SchedulerBuilder::new().build()
    }

    pub(crate) fn from_builder(builder: SchedulerBuilder) -> Result<Self> {
        let poller = Poller::new()?;
        let countdown = CountdownTimer::new()?;
        let signals = SignalFd::new()?;
        let countdown_fd = countdown.fd();
        let signal_fd = signals.fd();

        let mut sched = Self {
            arena: Arena::with_capacity(builder.arena_capacity),
            read: DeadlineQueue::new(),
            write: DeadlineQueue::new(),
            timer: DeadlineQueue::new(),
            child: DeadlineQueue::new(),
            child_pid: BTreeMap::new(),
            records: BTreeMap::new(),
            event_queue: VecDeque::new(),
            ready_queue: VecDeque::new(),
            poller,
            countdown,
            signals,
            countdown_fd,
            signal_fd,
            next_seq: 1,
            shutting_down: false,
            shutdown_timer_running: false,
            child_exit_policy: builder.child_exit_policy,
            last_wait_errno: None,
            _not_send: PhantomData,
        };

        sched.register_countdown_task()?;
        sched.register_signal_task()?;

        debug!(
            "scheduler: created (timerfd {}, signalfd {})",
            sched.countdown_fd, sched.signal_fd
        );
        Ok(sched)
    }

    pub(crate) fn index(&self, kind: IndexKind) -> &DeadlineQueue {
        match kind {
            IndexKind::Read => &self.read,
            IndexKind::Write => &self.write,
            IndexKind::Timer => &self.timer,
            IndexKind::Child => &self.child,
        }
    }

    pub(crate) fn index_mut(&mut self, kind: IndexKind) -> &mut DeadlineQueue {
        match kind {
            IndexKind::Read => &mut self.read,
            IndexKind::Write => &mut self.write,
            IndexKind::Timer => &mut self.timer,
            IndexKind::Child => &mut self.child,
        }
    }

    pub(crate) fn alloc_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// The interest currently registered for a descriptor, if any. Intended
    /// for introspection and tests; `None` means the descriptor is unknown
    /// to the scheduler's epoll instance.
    pub fn registered_interest(&self, fd: RawFd) -> Option<Interest> {
        self.records.get(&fd).map(|record| record.interest)
    }

    /// Whether a child watch for `pid` is pending.
    pub fn has_child_watch(&self, pid: libc::pid_t) -> bool {
        self.child_pid.contains_key(&pid)
    }

    /// True once a [`TerminateStart`](crate::TaskKind::TerminateStart) item
    /// has been dispatched.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Close the descriptors callers flagged for cleanup. Everything
        // else (epoll, timerfd, signalfd) closes with its own handle.
        let mut doomed = Vec::new();
        for (_, _, task) in self.read.iter().chain(self.write.iter()) {
            if let Some(item) = self.arena.get(task) {
                if let Payload::Fd {
                    fd,
                    close_on_cleanup: true,
                } = item.payload
                {
                    doomed.push(fd);
                }
            }
        }
        for fd in doomed {
            unsafe { libc::close(fd) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn never_deadline_is_not_a_wake_candidate() {
        let mut sched = Scheduler::new().unwrap();
        let (rfd, wfd) = pipe();

        sched.add_read(rfd, None, false, |_, _| {}).unwrap();
        // Only never-deadline items exist (the internal timerfd/signalfd
        // tasks are registered with no deadline as well).
        assert_eq!(sched.next_wake(), None);

        sched.add_timer(Some(std::time::Duration::from_secs(3600)), |_, _| {});
        assert!(sched.next_wake().is_some());

        unsafe {
            libc::close(rfd);
            libc::close(wfd);
        }
    }

    #[test]
    fn schedulers_are_independent() {
        let a = Scheduler::new().unwrap();
        let b = Scheduler::new().unwrap();
        assert_ne!(a.countdown_fd, b.countdown_fd);
        assert_ne!(a.signal_fd, b.signal_fd);
    }

    #[test]
    fn dump_lists_registered_work() {
        let mut sched = Scheduler::new().unwrap();
        sched.add_timer(Some(std::time::Duration::from_secs(5)), |_, _| {});
        sched.add_event(3, |_, _| {});

        let out = sched.dump_to_string();
        assert!(out.contains("TIMER"));
        assert!(out.contains("EVENT"));
        // The internal timerfd/signalfd tasks show up in the read index.
        assert!(out.contains("READ"));
    }
}
