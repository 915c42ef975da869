//! OS-facing pieces of the scheduler.
//!
//! Everything that touches a kernel facility lives here:
//! - [`poller`]: the epoll instance and its notification buffer
//! - [`event`]: per-descriptor interest records
//! - [`timerfd`]: the countdown timer that bounds every wait
//! - [`signalfd`]: SIGCHLD delivery as an ordinary readable descriptor

pub(crate) mod event;
pub(crate) mod poller;
pub(crate) mod signalfd;
pub(crate) mod timerfd;
