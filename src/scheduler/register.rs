//! Registration: the `add_*` family.
//!
//! Descriptor registrations share one [`EventRecord`] per fd. The record
//! keeps the epoll mask equal to the OR of the active directions, and a
//! failed `epoll_ctl` rolls the task back to the arena so no half
//! registered descriptor is left behind.

use std::os::unix::io::RawFd;
use std::time::Duration;

use tracing::warn;

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::reactor::event::{Direction, EventRecord};
use crate::scheduler::Scheduler;
use crate::task::{Activation, Callback, Container, IndexKind, Payload, QueueKind, TaskItem, TaskKind, TaskRef};

impl Scheduler {
    /// Registers a read task on `fd`.
    ///
    /// The callback runs once, when the descriptor becomes readable
    /// ([`ReadyFd`](TaskKind::ReadyFd)), when the timeout passes first
    /// ([`ReadTimeout`](TaskKind::ReadTimeout)), or when the kernel reports
    /// hang-up or error ([`ReadError`](TaskKind::ReadError)). `None` as the
    /// timeout means the task waits forever. With `close_on_cleanup` the
    /// descriptor is closed when the scheduler is torn down while the task
    /// is still waiting.
    ///
    /// # Errors
    /// [`Error::ReadBusy`] if a read task is already bound to `fd`;
    /// [`Error::Register`] if the epoll registration fails, in which case
    /// the task never entered the scheduler.
    pub fn add_read<F>(
        &mut self,
        fd: RawFd,
        timeout: Option<Duration>,
        close_on_cleanup: bool,
        callback: F,
    ) -> Result<TaskRef>
    where
        F: FnOnce(&mut Scheduler, Activation) + 'static,
    {
        self.add_fd_task(Direction::Read, fd, timeout, close_on_cleanup, Box::new(callback))
    }

    /// Registers a write task on `fd`. Same shape and error conditions as
    /// [`add_read`](Scheduler::add_read), for write readiness.
    pub fn add_write<F>(
        &mut self,
        fd: RawFd,
        timeout: Option<Duration>,
        close_on_cleanup: bool,
        callback: F,
    ) -> Result<TaskRef>
    where
        F: FnOnce(&mut Scheduler, Activation) + 'static,
    {
        self.add_fd_task(Direction::Write, fd, timeout, close_on_cleanup, Box::new(callback))
    }

    fn add_fd_task(
        &mut self,
        direction: Direction,
        fd: RawFd,
        timeout: Option<Duration>,
        close_on_cleanup: bool,
        callback: Callback,
    ) -> Result<TaskRef> {
        let bit = direction.bit();

        if let Some(record) = self.records.get(&fd) {
            if record.interest.contains(bit) && record.binding(direction).is_some() {
                warn!(
                    "scheduler: there is already a {} task bound on fd {fd}",
                    if direction == Direction::Read { "read" } else { "write" },
                );
                return Err(match direction {
                    Direction::Read => Error::ReadBusy(fd),
                    Direction::Write => Error::WriteBusy(fd),
                });
            }
        }

        let (kind, index) = match direction {
            Direction::Read => (TaskKind::Read, IndexKind::Read),
            Direction::Write => (TaskKind::Write, IndexKind::Write),
        };
        let deadline = Deadline::after(timeout);
        let seq = self.alloc_seq();
        let task = self.arena.alloc(TaskItem {
            kind,
            seq,
            deadline,
            payload: Payload::Fd {
                fd,
                close_on_cleanup,
            },
            callback: Some(callback),
            container: Container::Index(index),
        });

        let record = self
            .records
            .entry(fd)
            .or_insert_with(|| EventRecord::new(fd));
        record.interest = record.interest.union(bit);
        record.bind(direction, task);

        if !record.armed.contains(bit) {
            let outcome = if record.registered {
                self.poller.modify(fd, record.interest)
            } else {
                self.poller.add(fd, record.interest)
            };

            match outcome {
                Ok(()) => {
                    record.armed = record.armed.union(bit);
                    record.registered = true;
                }
                Err(err) => {
                    warn!("scheduler: cannot register {bit} interest for fd {fd}: {err}");
                    record.unbind(direction);
                    record.interest = record.interest.remove(bit);
                    let defunct = record.interest.is_empty() && !record.registered;
                    if defunct {
                        self.records.remove(&fd);
                    }
                    self.arena.release(task);
                    return Err(Error::Register { fd, source: err });
                }
            }
        }

        self.index_mut(index).insert(deadline, seq, task);
        Ok(task)
    }

    /// Registers a timer task. The callback runs as
    /// [`Ready`](TaskKind::Ready) once the timeout passes; `None` schedules
    /// a timer that never fires until [`update_timer`](Scheduler::update_timer)
    /// gives it a deadline.
    pub fn add_timer<F>(&mut self, timeout: Option<Duration>, callback: F) -> TaskRef
    where
        F: FnOnce(&mut Scheduler, Activation) + 'static,
    {
        self.add_timer_task(TaskKind::Timer, timeout, Box::new(callback))
    }

    /// Registers a timer that stays runnable through the shutdown phase and
    /// keeps the dispatch loop alive until it fires or is cancelled.
    pub fn add_timer_shutdown<F>(&mut self, timeout: Option<Duration>, callback: F) -> TaskRef
    where
        F: FnOnce(&mut Scheduler, Activation) + 'static,
    {
        self.shutdown_timer_running = true;
        self.add_timer_task(TaskKind::TimerShutdown, timeout, Box::new(callback))
    }

    fn add_timer_task(
        &mut self,
        kind: TaskKind,
        timeout: Option<Duration>,
        callback: Callback,
    ) -> TaskRef {
        let deadline = Deadline::after(timeout);
        let seq = self.alloc_seq();
        let task = self.arena.alloc(TaskItem {
            kind,
            seq,
            deadline,
            payload: Payload::Value(0),
            callback: Some(callback),
            container: Container::Index(IndexKind::Timer),
        });
        self.timer.insert(deadline, seq, task);
        task
    }

    /// Registers a watch on child process `pid`.
    ///
    /// The callback runs as [`ChildTerminated`](TaskKind::ChildTerminated)
    /// with the wait status in the payload once the child's exit has been
    /// reaped, or as [`ChildTimeout`](TaskKind::ChildTimeout) if the
    /// timeout passes first.
    pub fn add_child<F>(
        &mut self,
        pid: libc::pid_t,
        timeout: Option<Duration>,
        callback: F,
    ) -> TaskRef
    where
        F: FnOnce(&mut Scheduler, Activation) + 'static,
    {
        let deadline = Deadline::after(timeout);
        let seq = self.alloc_seq();
        let task = self.arena.alloc(TaskItem {
            kind: TaskKind::Child,
            seq,
            deadline,
            payload: Payload::Child { pid, status: 0 },
            callback: Some(Box::new(callback)),
            container: Container::Index(IndexKind::Child),
        });
        self.child.insert(deadline, seq, task);

        if self.child_pid.insert(pid, task).is_some() {
            warn!("scheduler: replacing existing child watch for pid {pid}");
        }
        task
    }

    /// Enqueues a task for immediate dispatch, ahead of everything the next
    /// reactor cycle produces. `val` is handed back through the payload.
    pub fn add_event<F>(&mut self, val: i64, callback: F) -> TaskRef
    where
        F: FnOnce(&mut Scheduler, Activation) + 'static,
    {
        self.add_event_task(TaskKind::Event, Payload::Value(val), Some(Box::new(callback)))
    }

    /// Enqueues the event that ends the dispatch loop.
    pub fn add_terminate_event(&mut self) -> TaskRef {
        self.add_event_task(TaskKind::Terminate, Payload::None, None)
    }

    /// Enqueues the event that begins graceful shutdown. The callback runs
    /// first; from then on only shutdown-relevant tasks are dispatched.
    pub fn add_start_terminate_event<F>(&mut self, callback: F) -> TaskRef
    where
        F: FnOnce(&mut Scheduler, Activation) + 'static,
    {
        self.add_event_task(TaskKind::TerminateStart, Payload::None, Some(Box::new(callback)))
    }

    fn add_event_task(
        &mut self,
        kind: TaskKind,
        payload: Payload,
        callback: Option<Callback>,
    ) -> TaskRef {
        let seq = self.alloc_seq();
        let task = self.arena.alloc(TaskItem {
            kind,
            seq,
            deadline: Deadline::Never,
            payload,
            callback,
            container: Container::Queue(QueueKind::Event),
        });
        self.event_queue.push_back(task);
        task
    }
}
