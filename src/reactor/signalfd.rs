//! SIGCHLD delivery through a descriptor.
//!
//! The signal is blocked on the scheduler thread and routed through a
//! signalfd registered as an ordinary read task, so child reaping runs in
//! normal context with no async-signal-safety constraints. No direct
//! signal handler is ever installed.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;

use tracing::warn;

pub(crate) struct SignalFd {
    fd: RawFd,
}

impl SignalFd {
    pub(crate) fn new() -> io::Result<Self> {
        unsafe {
            let mut mask: libc::sigset_t = mem::zeroed();
            libc::sigemptyset(&mut mask);
            libc::sigaddset(&mut mask, libc::SIGCHLD);

            // The signal must be blocked or it would be delivered the
            // default way and never reach the descriptor.
            if libc::pthread_sigmask(libc::SIG_BLOCK, &mask, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }

            let fd = libc::signalfd(-1, &mask, libc::SFD_NONBLOCK | libc::SFD_CLOEXEC);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { fd })
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    /// Drains every pending signal record, returning how many were read.
    pub(crate) fn drain(&self) -> usize {
        let mut count = 0;
        loop {
            let mut info: libc::signalfd_siginfo = unsafe { mem::zeroed() };
            let n = unsafe {
                libc::read(
                    self.fd,
                    &mut info as *mut libc::signalfd_siginfo as *mut libc::c_void,
                    mem::size_of::<libc::signalfd_siginfo>(),
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::WouldBlock {
                    warn!("scheduler: error reading signalfd {}: {err}", self.fd);
                }
                break;
            }
            if (n as usize) < mem::size_of::<libc::signalfd_siginfo>() {
                break;
            }
            count += 1;
        }
        count
    }
}

impl Drop for SignalFd {
    fn drop(&mut self) {
        // The mask stays blocked: another scheduler instance may still rely
        // on it, and SIGCHLD's default disposition discards the signal
        // anyway.
        unsafe { libc::close(self.fd) };
    }
}
