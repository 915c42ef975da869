//! Cancellation and repositioning.
//!
//! Cancellation is synchronous and total: once `cancel` returns, the item
//! will not be dispatched and its record bindings and index membership are
//! gone. Stale handles (the task already ran or was cancelled) are ignored.

use std::os::unix::io::RawFd;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::deadline::Deadline;
use crate::reactor::event::Direction;
use crate::scheduler::Scheduler;
use crate::task::{Container, Payload, QueueKind, TaskKind, TaskRef};

impl Scheduler {
    /// Cancels a task and recycles it.
    ///
    /// Descriptor tasks detach from their event record first: if the other
    /// direction still has interest the epoll mask is downgraded, otherwise
    /// the descriptor is deregistered and the record destroyed. A stale
    /// handle, or the handle of the task currently being dispatched, is a
    /// no-op.
    pub fn cancel(&mut self, task: TaskRef) {
        let Some(item) = self.arena.get(task) else {
            trace!("scheduler: cancel on stale task handle");
            return;
        };
        let kind = item.kind;
        let container = item.container;
        let payload = item.payload;
        let deadline = item.deadline;
        let seq = item.seq;

        match container {
            Container::Arena => return,
            Container::Dispatching => {
                debug!("scheduler: ignoring cancel of task {seq} while it is dispatching");
                return;
            }
            Container::Index(index) => {
                match kind {
                    TaskKind::Read => {
                        if let Payload::Fd { fd, .. } = payload {
                            self.detach_direction(fd, Direction::Read);
                        }
                    }
                    TaskKind::Write => {
                        if let Payload::Fd { fd, .. } = payload {
                            self.detach_direction(fd, Direction::Write);
                        }
                    }
                    TaskKind::TimerShutdown => self.shutdown_timer_running = false,
                    TaskKind::Child => {
                        if let Payload::Child { pid, .. } = payload {
                            self.child_pid.remove(&pid);
                        }
                    }
                    _ => {}
                }
                self.index_mut(index).remove(deadline, seq);
            }
            Container::Queue(queue) => {
                // A promoted descriptor task leaves stale armed interest
                // behind; cancelling it is the moment to drop that too.
                if matches!(
                    kind,
                    TaskKind::ReadyFd
                        | TaskKind::ReadTimeout
                        | TaskKind::WriteTimeout
                        | TaskKind::ReadError
                        | TaskKind::WriteError
                ) {
                    if let Payload::Fd { fd, .. } = payload {
                        self.drop_stale_interest(fd);
                    }
                }
                if kind == TaskKind::TimerShutdown {
                    self.shutdown_timer_running = false;
                }
                self.unlink_queue(queue, task);
            }
        }

        self.arena.release(task);
        trace!("scheduler: cancelled {} task {seq}", kind.name());
    }

    /// Cancels whatever is bound to `fd`, both directions.
    pub fn cancel_fd(&mut self, fd: RawFd) {
        let Some(record) = self.records.get(&fd) else {
            return;
        };
        let read = record.read;
        let write = record.write;

        if let Some(task) = write {
            self.cancel(task);
        }
        if let Some(task) = read {
            self.cancel(task);
        }
    }

    /// Moves the read task bound to `fd` to a new deadline. A no-op if the
    /// task is no longer waiting (it has already been promoted and is about
    /// to run).
    pub fn requeue_read(&mut self, fd: RawFd, timeout: Option<Duration>) {
        let Some(record) = self.records.get(&fd) else {
            return;
        };
        let Some(task) = record.read else {
            return;
        };
        let Some(item) = self.arena.get_mut(task) else {
            return;
        };
        if item.kind != TaskKind::Read {
            return;
        }

        let old = (item.deadline, item.seq);
        item.deadline = Deadline::after(timeout);
        let (deadline, seq) = (item.deadline, item.seq);

        self.read.remove(old.0, old.1);
        self.read.insert(deadline, seq, task);
    }

    /// Moves a timer task to a new deadline. Left alone if the timer has
    /// already been promoted, since it is about to run regardless.
    pub fn update_timer(&mut self, task: TaskRef, timeout: Option<Duration>) {
        let Some(item) = self.arena.get_mut(task) else {
            trace!("scheduler: update_timer on stale task handle");
            return;
        };
        if !matches!(item.kind, TaskKind::Timer | TaskKind::TimerShutdown) {
            return;
        }

        let deadline = Deadline::after(timeout);
        if deadline == item.deadline {
            return;
        }

        let old = (item.deadline, item.seq);
        item.deadline = deadline;
        let seq = item.seq;

        self.timer.remove(old.0, old.1);
        self.timer.insert(deadline, seq, task);
    }

    /// Detaches one direction from a descriptor's record: downgrade the
    /// epoll mask while the other direction keeps interest, deregister and
    /// destroy the record otherwise.
    pub(crate) fn detach_direction(&mut self, fd: RawFd, direction: Direction) {
        let bit = direction.bit();
        let (empty, registered, mask);
        {
            let Some(record) = self.records.get_mut(&fd) else {
                return;
            };
            record.unbind(direction);
            if !record.interest.contains(bit) {
                return;
            }
            record.interest = record.interest.remove(bit);
            record.armed = record.armed.remove(bit);
            empty = record.interest.is_empty();
            registered = record.registered;
            mask = record.interest;
        }

        if empty {
            if registered {
                self.poller_delete_quiet(fd);
            }
            self.records.remove(&fd);
        } else if let Err(err) = self.poller.modify(fd, mask) {
            warn!("scheduler: cannot downgrade epoll interest for fd {fd}: {err}");
        }
    }

    /// Drops every direction that kept armed interest without a bound task
    /// (left behind when the task was promoted), destroying the record if
    /// nothing remains.
    pub(crate) fn drop_stale_interest(&mut self, fd: RawFd) {
        let (empty, registered, mask);
        {
            let Some(record) = self.records.get_mut(&fd) else {
                return;
            };
            if record.read.is_none() {
                record.interest = record.interest.remove(Direction::Read.bit());
                record.armed = record.armed.remove(Direction::Read.bit());
            }
            if record.write.is_none() {
                record.interest = record.interest.remove(Direction::Write.bit());
                record.armed = record.armed.remove(Direction::Write.bit());
            }
            empty = record.interest.is_empty();
            registered = record.registered;
            mask = record.interest;
        }

        if empty {
            if registered {
                self.poller_delete_quiet(fd);
            }
            self.records.remove(&fd);
        } else if let Err(err) = self.poller.modify(fd, mask) {
            warn!("scheduler: cannot downgrade epoll interest for fd {fd}: {err}");
        }
    }

    /// Deregisters a descriptor, staying quiet about `EBADF`: the caller
    /// may legitimately have closed it already.
    pub(crate) fn poller_delete_quiet(&mut self, fd: RawFd) {
        if let Err(err) = self.poller.delete(fd) {
            if err.raw_os_error() != Some(libc::EBADF) {
                warn!("scheduler: error deregistering fd {fd}: {err}");
            }
        }
    }

    pub(crate) fn unlink_queue(&mut self, queue: QueueKind, task: TaskRef) {
        let deque = match queue {
            QueueKind::Event => &mut self.event_queue,
            QueueKind::Ready => &mut self.ready_queue,
        };
        if let Some(position) = deque.iter().position(|t| *t == task) {
            deque.remove(position);
        }
    }
}
