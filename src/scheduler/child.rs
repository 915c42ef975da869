//! Child process reaping.
//!
//! Reaping is driven by SIGCHLD arriving on the signalfd task, never from
//! a real signal handler, and uses `WNOHANG` throughout so it cannot
//! block. Exits are matched to watches through the pid index.

use std::io;

use tracing::{debug, info, trace};

use crate::scheduler::Scheduler;
use crate::task::{Payload, TaskKind};

impl Scheduler {
    /// Drains every child that has exited so far. Exits without a watch
    /// are left to whoever owns them.
    pub fn reap_children(&mut self) {
        loop {
            let mut status: libc::c_int = 0;
            let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };

            if pid == 0 {
                // Children exist but none has exited.
                break;
            }
            if pid < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ECHILD) {
                    debug!("scheduler: waitpid error: {err}");
                }
                break;
            }

            self.notify_child_exit(pid, status);
        }
    }

    /// Records the exit of a watched child.
    ///
    /// The watch leaves the pid index immediately. Unless the installed
    /// child-exit policy classifies the status as a permanent failure, the
    /// watch is promoted and its callback runs as
    /// [`ChildTerminated`](TaskKind::ChildTerminated) with the status in
    /// the payload; a permanent failure instead recycles the watch and
    /// enqueues a program-wide terminate event.
    ///
    /// Called by the internal reaper; public so embedders that reap
    /// elsewhere can feed exits in. Exits for pids without a watch are
    /// ignored.
    pub fn notify_child_exit(&mut self, pid: libc::pid_t, status: libc::c_int) {
        let Some(task) = self.child_pid.remove(&pid) else {
            trace!("scheduler: exit of unwatched child {pid}, ignoring");
            return;
        };

        let permanent = match self.child_exit_policy.as_mut() {
            Some(policy) => policy(pid, status),
            None => false,
        };

        let Some(item) = self.arena.get_mut(task) else {
            return;
        };
        if let Payload::Child { status: slot, .. } = &mut item.payload {
            *slot = status;
        }

        if permanent {
            // No point reporting to the watcher: stop the whole program.
            info!("scheduler: child {pid} exited with a permanent error, terminating");
            let (deadline, seq) = (item.deadline, item.seq);
            self.child.remove(deadline, seq);
            self.arena.release(task);
            self.add_terminate_event();
        } else {
            debug!("scheduler: child {pid} terminated with status {status:#x}");
            self.promote(task, TaskKind::ChildTerminated);
        }
    }
}
