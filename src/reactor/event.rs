//! Per-descriptor interest tracking.

use std::fmt;
use std::os::unix::io::RawFd;

use crate::task::TaskRef;

/// Which directions of readiness are requested on a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READ: Interest = Interest(0b01);
    pub const WRITE: Interest = Interest(0b10);

    pub fn union(self, other: Self) -> Self {
        Interest(self.0 | other.0)
    }

    pub fn remove(self, other: Self) -> Self {
        Interest(self.0 & !other.0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_readable(self) -> bool {
        self.contains(Interest::READ)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Interest::WRITE)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The epoll event mask for this interest set. Read interest opts into
    /// `EPOLLRDHUP` so peer half-closes surface through the error path.
    pub(crate) fn epoll_mask(self) -> u32 {
        let mut mask = 0;
        if self.is_readable() {
            mask |= (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
        }
        if self.is_writable() {
            mask |= libc::EPOLLOUT as u32;
        }
        mask
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_readable(), self.is_writable()) {
            (true, true) => write!(f, "read|write"),
            (true, false) => write!(f, "read"),
            (false, true) => write!(f, "write"),
            (false, false) => write!(f, "none"),
        }
    }
}

/// One record per descriptor with active interest.
///
/// `interest` is what callers asked for, `armed` is what the epoll mask
/// currently carries, and `registered` says whether the descriptor has been
/// added to the epoll instance at all. The two can drift apart on purpose:
/// when a readiness notification promotes the bound task, only the binding
/// is cleared, so a follow-up registration for the same direction can skip
/// the `epoll_ctl` call.
pub(crate) struct EventRecord {
    pub(crate) fd: RawFd,
    pub(crate) read: Option<TaskRef>,
    pub(crate) write: Option<TaskRef>,
    pub(crate) interest: Interest,
    pub(crate) armed: Interest,
    pub(crate) registered: bool,
}

/// A single direction of descriptor interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

impl Direction {
    pub(crate) fn bit(self) -> Interest {
        match self {
            Direction::Read => Interest::READ,
            Direction::Write => Interest::WRITE,
        }
    }
}

impl EventRecord {
    pub(crate) fn new(fd: RawFd) -> Self {
        Self {
            fd,
            read: None,
            write: None,
            interest: Interest::NONE,
            armed: Interest::NONE,
            registered: false,
        }
    }

    pub(crate) fn binding(&self, direction: Direction) -> Option<TaskRef> {
        match direction {
            Direction::Read => self.read,
            Direction::Write => self.write,
        }
    }

    pub(crate) fn bind(&mut self, direction: Direction, task: TaskRef) {
        match direction {
            Direction::Read => self.read = Some(task),
            Direction::Write => self.write = Some(task),
        }
    }

    pub(crate) fn unbind(&mut self, direction: Direction) {
        match direction {
            Direction::Read => self.read = None,
            Direction::Write => self.write = None,
        }
    }
}
