//! The dispatch loop and the reactor cycle feeding it.
//!
//! One pass: drain the event queue, then the ready queue, otherwise arm
//! the countdown timer with the earliest pending deadline and block in
//! `epoll_wait` until notifications arrive, translating each one into a
//! ready-queue insertion. During shutdown only an allow-list of task kinds
//! still runs; everything else is drained and recycled unexecuted.

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::task::{Activation, Container, IndexKind, Payload, QueueKind, TaskKind, TaskRef};

/// Wait used when no deadline is pending anywhere: large enough to be
/// effectively unbounded, finite so the loop still re-evaluates.
const IDLE_WAIT: Duration = Duration::from_secs(u32::MAX as u64);

impl Scheduler {
    /// Runs the dispatch loop until a [`Terminate`](TaskKind::Terminate)
    /// item is processed, or until shutdown has drained (shutdown phase
    /// entered, no shutdown timer pending, no child watches left).
    pub fn run(&mut self) {
        while self.run_one() {}
        debug!("scheduler: dispatch loop finished");
    }

    /// Dispatches exactly one item, blocking until one is runnable.
    /// Returns `false` once the loop should stop.
    pub fn run_one(&mut self) -> bool {
        let task = self.fetch_next();

        let Some(item) = self.arena.get_mut(task) else {
            warn!("scheduler: dequeued task no longer in arena");
            return true;
        };
        item.container = Container::Dispatching;
        let kind = item.kind;
        let seq = item.seq;
        let payload = item.payload;
        let callback = item.callback.take();

        if !self.shutting_down || self.runs_during_shutdown(kind, payload) {
            if let Some(callback) = callback {
                trace!("scheduler: running {} task {seq} ({payload})", kind.name());
                callback(
                    self,
                    Activation {
                        kind,
                        id: seq,
                        payload,
                    },
                );
            }
            if kind == TaskKind::TerminateStart {
                debug!("scheduler: entering shutdown phase");
                self.shutting_down = true;
            }
        } else {
            trace!(
                "scheduler: discarding {} task {seq} during shutdown",
                kind.name()
            );
        }

        if kind == TaskKind::TimerShutdown {
            self.shutdown_timer_running = false;
        }

        self.arena.release(task);

        if self.shutting_down && !self.shutdown_timer_running && self.child.is_empty() {
            return false;
        }
        kind != TaskKind::Terminate
    }

    /// During shutdown only these still run: the scheduler's own timerfd
    /// and signalfd tasks, child-related work, and termination items.
    fn runs_during_shutdown(&self, kind: TaskKind, payload: Payload) -> bool {
        match kind {
            TaskKind::ReadyFd => matches!(
                payload,
                Payload::Fd { fd, .. } if fd == self.countdown_fd || fd == self.signal_fd
            ),
            TaskKind::Child
            | TaskKind::ChildTimeout
            | TaskKind::ChildTerminated
            | TaskKind::TimerShutdown
            | TaskKind::Terminate => true,
            _ => false,
        }
    }

    /// The next runnable item: event queue first, then ready queue, else
    /// reactor cycles until the ready queue fills.
    fn fetch_next(&mut self) -> TaskRef {
        if let Some(task) = self.event_queue.pop_front() {
            return task;
        }
        if let Some(task) = self.ready_queue.pop_front() {
            return task;
        }

        loop {
            self.arm_countdown();

            let count = match self.poller.wait() {
                Ok(count) => count,
                Err(err) => {
                    let errno = err.raw_os_error().unwrap_or(0);
                    if errno == libc::EINTR {
                        continue;
                    }

                    // Log each distinct cause once, and back off only for
                    // causes that would otherwise spin.
                    if self.last_wait_errno != Some(errno) {
                        self.last_wait_errno = Some(errno);
                        warn!("scheduler: epoll_wait error: {err}");
                    }
                    if matches!(errno, libc::EBADF | libc::EFAULT | libc::EINVAL) {
                        std::thread::sleep(Duration::from_secs(1));
                    }
                    continue;
                }
            };

            self.translate(count);

            if let Some(task) = self.ready_queue.pop_front() {
                return task;
            }
        }
    }

    /// The earliest concrete deadline across the four indices.
    pub(crate) fn next_wake(&self) -> Option<Instant> {
        [&self.read, &self.write, &self.timer, &self.child]
            .into_iter()
            .filter_map(|queue| queue.next_wake())
            .min()
    }

    /// Arms the countdown timer with the delay to the next wake. A deadline
    /// already in the past arms the minimum delay, so the wait returns
    /// immediately instead of spinning here.
    fn arm_countdown(&mut self) {
        let delay = match self.next_wake() {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => IDLE_WAIT,
        };
        if let Err(err) = self.countdown.arm(delay) {
            warn!("scheduler: cannot arm countdown timer: {err}");
        }
    }

    /// Resolves each notification to its event record and promotes the
    /// bound tasks.
    fn translate(&mut self, count: usize) {
        for i in 0..count {
            let (mask, fd) = self.poller.notification(i);

            let error_mask = (libc::EPOLLHUP | libc::EPOLLERR | libc::EPOLLRDHUP) as u32;
            if mask & error_mask != 0 {
                let Some(mut record) = self.records.remove(&fd) else {
                    debug!("scheduler: error notification for unknown fd {fd}, ignoring");
                    continue;
                };
                if mask & libc::EPOLLRDHUP as u32 != 0 {
                    trace!("scheduler: received EPOLLRDHUP for fd {fd}");
                }
                if let Some(task) = record.read.take() {
                    self.promote(task, TaskKind::ReadError);
                }
                if let Some(task) = record.write.take() {
                    self.promote(task, TaskKind::WriteError);
                }
                if record.registered {
                    self.poller_delete_quiet(fd);
                }
                continue;
            }

            if mask & libc::EPOLLIN as u32 != 0 {
                match self.records.get_mut(&fd).and_then(|r| r.read.take()) {
                    Some(task) => self.promote(task, TaskKind::ReadyFd),
                    None => warn!(
                        "scheduler: no read task bound on fd {fd} (flags {mask:#x})"
                    ),
                }
            }

            if mask & libc::EPOLLOUT as u32 != 0 {
                match self.records.get_mut(&fd).and_then(|r| r.write.take()) {
                    Some(task) => self.promote(task, TaskKind::ReadyFd),
                    None => warn!(
                        "scheduler: no write task bound on fd {fd} (flags {mask:#x})"
                    ),
                }
            }
        }
    }

    /// Moves an index-resident task to the ready queue under its promoted
    /// kind. A shutdown timer keeps its kind so the shutdown filter still
    /// recognizes it.
    pub(crate) fn promote(&mut self, task: TaskRef, kind: TaskKind) {
        let Some(item) = self.arena.get(task) else {
            return;
        };
        let current = item.kind;
        let deadline = item.deadline;
        let seq = item.seq;
        let payload = item.payload;
        let Container::Index(index) = item.container else {
            return;
        };

        self.index_mut(index).remove(deadline, seq);
        if kind == TaskKind::ChildTimeout {
            if let Payload::Child { pid, .. } = payload {
                self.child_pid.remove(&pid);
            }
        }

        if let Some(item) = self.arena.get_mut(task) {
            if current != TaskKind::TimerShutdown {
                item.kind = kind;
            }
            item.container = Container::Queue(QueueKind::Ready);
        }
        self.ready_queue.push_back(task);
    }

    /// Handler of the countdown timer task: sweep every index for expired
    /// deadlines, then re-register for the next expiry.
    pub(crate) fn on_countdown(&mut self, _activation: Activation) {
        self.countdown.drain();

        let now = Instant::now();
        self.sweep_expired(IndexKind::Read, TaskKind::ReadTimeout, now);
        self.sweep_expired(IndexKind::Write, TaskKind::WriteTimeout, now);
        self.sweep_expired(IndexKind::Timer, TaskKind::Ready, now);
        self.sweep_expired(IndexKind::Child, TaskKind::ChildTimeout, now);

        if let Err(err) = self.register_countdown_task() {
            warn!("scheduler: cannot re-register countdown task: {err}");
        }
    }

    /// Promotes every expired entry at the front of one index. Timed-out
    /// descriptor tasks drop their record binding; the armed interest stays
    /// so a follow-up registration can reuse it.
    fn sweep_expired(&mut self, index: IndexKind, kind: TaskKind, now: Instant) {
        loop {
            let Some((deadline, _, task)) = self.index(index).first() else {
                break;
            };
            if !deadline.expired(now) {
                break;
            }

            if matches!(kind, TaskKind::ReadTimeout | TaskKind::WriteTimeout) {
                let fd = self.arena.get(task).and_then(|item| item.payload.fd());
                if let Some(fd) = fd {
                    if let Some(record) = self.records.get_mut(&fd) {
                        match kind {
                            TaskKind::ReadTimeout => record.read = None,
                            _ => record.write = None,
                        }
                    }
                }
            }

            self.promote(task, kind);
        }
    }

    /// Handler of the signalfd task: drain pending SIGCHLD records, reap,
    /// re-register.
    pub(crate) fn on_signal(&mut self, _activation: Activation) {
        if self.signals.drain() > 0 {
            self.reap_children();
        }

        if let Err(err) = self.register_signal_task() {
            warn!("scheduler: cannot re-register signal task: {err}");
        }
    }

    pub(crate) fn register_countdown_task(&mut self) -> Result<()> {
        let fd = self.countdown_fd;
        self.add_read(fd, None, false, |sched: &mut Scheduler, activation| {
            sched.on_countdown(activation)
        })?;
        Ok(())
    }

    pub(crate) fn register_signal_task(&mut self) -> Result<()> {
        let fd = self.signal_fd;
        self.add_read(fd, None, false, |sched: &mut Scheduler, activation| {
            sched.on_signal(activation)
        })?;
        Ok(())
    }
}
