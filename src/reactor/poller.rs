//! Thin wrapper around the epoll instance.

use std::io;
use std::os::unix::io::RawFd;

use crate::reactor::event::Interest;

/// The notification buffer grows in increments of this many slots, keyed to
/// the number of registered descriptors. It never shrinks.
const BUFFER_INCREMENT: usize = 64;

/// Smallest buffer length that covers `count` registered descriptors.
fn buffer_len_for(count: usize) -> usize {
    (count / BUFFER_INCREMENT + 1) * BUFFER_INCREMENT
}

fn empty_event() -> libc::epoll_event {
    libc::epoll_event { events: 0, u64: 0 }
}

pub(crate) struct Poller {
    epoll_fd: RawFd,
    events: Vec<libc::epoll_event>,
    registered: usize,
}

impl Poller {
    pub(crate) fn new() -> io::Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            epoll_fd,
            events: vec![empty_event(); BUFFER_INCREMENT],
            registered: 0,
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest.epoll_mask(),
            u64: fd as u64,
        };
        let event_ptr: *mut libc::epoll_event = if op == libc::EPOLL_CTL_DEL {
            std::ptr::null_mut()
        } else {
            &mut event
        };

        if unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, event_ptr) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(crate) fn add(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest)?;
        self.registered += 1;
        self.ensure_capacity();
        Ok(())
    }

    pub(crate) fn modify(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest)
    }

    pub(crate) fn delete(&mut self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, Interest::NONE)?;
        self.registered = self.registered.saturating_sub(1);
        Ok(())
    }

    /// Grows the notification buffer to the next increment boundary above
    /// the registered count. The replacement is built before the old buffer
    /// is dropped, and the buffer is never shrunk.
    fn ensure_capacity(&mut self) {
        if self.registered < self.events.len() {
            return;
        }
        let grown = vec![empty_event(); buffer_len_for(self.registered)];
        self.events = grown;
    }

    /// Blocks until the kernel reports readiness. No timeout of its own:
    /// the countdown timer descriptor bounds the wait.
    pub(crate) fn wait(&mut self) -> io::Result<usize> {
        let n = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                -1,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    /// The `i`-th notification of the last wait: `(event mask, fd)`.
    pub(crate) fn notification(&self, i: usize) -> (u32, RawFd) {
        let event = self.events[i];
        (event.events, event.u64 as RawFd)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe { libc::close(self.epoll_fd) };
    }
}
