use scheduler::{Error, Scheduler};

use std::os::unix::io::RawFd;

/// A connected socket pair: each end is both readable and writable.
fn socket_pair() -> (RawFd, RawFd) {
    let mut fds = [0i32; 2];
    let res = unsafe {
        libc::socketpair(
            libc::AF_UNIX,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK,
            0,
            fds.as_mut_ptr(),
        )
    };
    assert_eq!(res, 0, "socketpair() failed");
    (fds[0], fds[1])
}

fn close_pair(a: RawFd, b: RawFd) {
    unsafe {
        libc::close(a);
        libc::close(b);
    }
}

#[test]
fn cancelling_one_direction_keeps_the_other_registered() {
    let mut sched = Scheduler::new().unwrap();
    let (sock, peer) = socket_pair();

    let read_task = sched.add_read(sock, None, false, |_, _| {}).unwrap();
    let write_task = sched.add_write(sock, None, false, |_, _| {}).unwrap();

    let interest = sched.registered_interest(sock).unwrap();
    assert!(interest.is_readable() && interest.is_writable());

    sched.cancel(read_task);
    let interest = sched.registered_interest(sock).unwrap();
    assert!(!interest.is_readable(), "read interest should be gone");
    assert!(interest.is_writable(), "write interest must survive");

    sched.cancel(write_task);
    assert!(
        sched.registered_interest(sock).is_none(),
        "last cancellation must fully deregister the fd"
    );

    close_pair(sock, peer);
}

#[test]
fn duplicate_direction_is_rejected() {
    let mut sched = Scheduler::new().unwrap();
    let (sock, peer) = socket_pair();

    sched.add_read(sock, None, false, |_, _| {}).unwrap();
    match sched.add_read(sock, None, false, |_, _| {}) {
        Err(Error::ReadBusy(fd)) => assert_eq!(fd, sock),
        other => panic!("expected ReadBusy, got {other:?}"),
    }

    // The write direction is independent and still free.
    sched.add_write(sock, None, false, |_, _| {}).unwrap();
    match sched.add_write(sock, None, false, |_, _| {}) {
        Err(Error::WriteBusy(fd)) => assert_eq!(fd, sock),
        other => panic!("expected WriteBusy, got {other:?}"),
    }

    close_pair(sock, peer);
}

#[test]
fn failed_registration_rolls_back() {
    let mut sched = Scheduler::new().unwrap();

    // A regular file is not pollable: epoll_ctl fails with EPERM.
    use std::os::unix::io::IntoRawFd;
    let fd = std::fs::File::open("Cargo.toml").unwrap().into_raw_fd();

    match sched.add_read(fd, None, false, |_, _| {}) {
        Err(Error::Register { fd: failed, .. }) => assert_eq!(failed, fd),
        other => panic!("expected Register error, got {other:?}"),
    }
    assert!(
        sched.registered_interest(fd).is_none(),
        "no half-registered record may remain"
    );

    unsafe { libc::close(fd) };
}

#[test]
fn cancel_fd_drops_both_directions() {
    let mut sched = Scheduler::new().unwrap();
    let (sock, peer) = socket_pair();

    sched.add_read(sock, None, false, |_, _| {}).unwrap();
    sched.add_write(sock, None, false, |_, _| {}).unwrap();

    sched.cancel_fd(sock);
    assert!(sched.registered_interest(sock).is_none());

    close_pair(sock, peer);
}

#[test]
fn stale_handle_is_inert() {
    let mut sched = Scheduler::new().unwrap();
    let (sock, peer) = socket_pair();

    let task = sched.add_read(sock, None, false, |_, _| {}).unwrap();
    sched.cancel(task);
    // Cancelling again must not touch anything.
    sched.cancel(task);
    assert!(sched.registered_interest(sock).is_none());

    close_pair(sock, peer);
}
