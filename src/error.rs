//! Error types surfaced by the registration API.

use std::io;
use std::os::unix::io::RawFd;

/// Errors reported synchronously by registration calls.
///
/// Runtime conditions on a watched descriptor (hang-up, peer error) are not
/// errors of the scheduler itself: they are delivered to the owning callback
/// as [`ReadError`]/[`WriteError`] activations instead.
///
/// [`ReadError`]: crate::TaskKind::ReadError
/// [`WriteError`]: crate::TaskKind::WriteError
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A read task is already bound to this descriptor and has not been
    /// consumed yet.
    #[error("read interest already bound on fd {0}")]
    ReadBusy(RawFd),

    /// A write task is already bound to this descriptor and has not been
    /// consumed yet.
    #[error("write interest already bound on fd {0}")]
    WriteBusy(RawFd),

    /// The kernel rejected the epoll registration for this descriptor. The
    /// task was rolled back and never entered the scheduler.
    #[error("epoll registration failed for fd {fd}")]
    Register {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    /// Setup of one of the scheduler's own handles (epoll instance, timerfd,
    /// signalfd) failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
