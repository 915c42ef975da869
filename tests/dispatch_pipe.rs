use scheduler::{Scheduler, TaskKind};

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0i32; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0, "pipe() failed");
    (fds[0], fds[1])
}

fn write_byte(fd: RawFd) {
    let buf = [1u8; 1];
    assert_eq!(unsafe { libc::write(fd, buf.as_ptr() as *const _, 1) }, 1);
}

fn run_until(sched: &mut Scheduler, mut done: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if done() {
            return;
        }
        assert!(sched.run_one(), "dispatch loop stopped unexpectedly");
    }
    panic!("condition not reached after 1000 dispatches");
}

#[test]
fn readable_pipe_dispatches_ready_fd() {
    let mut sched = Scheduler::new().unwrap();
    let (rfd, wfd) = pipe();
    write_byte(wfd);

    let seen: Rc<RefCell<Option<(TaskKind, RawFd)>>> = Rc::new(RefCell::new(None));
    let s = seen.clone();
    sched
        .add_read(rfd, None, false, move |_, activation| {
            *s.borrow_mut() = Some((activation.kind, activation.payload.fd().unwrap()));
        })
        .unwrap();

    run_until(&mut sched, || seen.borrow().is_some());
    assert_eq!(*seen.borrow(), Some((TaskKind::ReadyFd, rfd)));

    unsafe {
        libc::close(rfd);
        libc::close(wfd);
    }
}

#[test]
fn silent_pipe_dispatches_read_timeout() {
    let mut sched = Scheduler::new().unwrap();
    let (rfd, wfd) = pipe();

    let seen: Rc<RefCell<Option<TaskKind>>> = Rc::new(RefCell::new(None));
    let s = seen.clone();
    sched
        .add_read(rfd, Some(Duration::from_millis(30)), false, move |_, activation| {
            *s.borrow_mut() = Some(activation.kind);
        })
        .unwrap();

    run_until(&mut sched, || seen.borrow().is_some());
    assert_eq!(*seen.borrow(), Some(TaskKind::ReadTimeout));

    unsafe {
        libc::close(rfd);
        libc::close(wfd);
    }
}

#[test]
fn writable_pipe_dispatches_ready_fd() {
    let mut sched = Scheduler::new().unwrap();
    let (rfd, wfd) = pipe();

    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    sched
        .add_write(wfd, None, false, move |_, activation| {
            *s.borrow_mut() = Some(activation.kind);
        })
        .unwrap();

    run_until(&mut sched, || seen.borrow().is_some());
    assert_eq!(*seen.borrow(), Some(TaskKind::ReadyFd));

    unsafe {
        libc::close(rfd);
        libc::close(wfd);
    }
}

#[test]
fn requeue_read_applies_new_deadline() {
    let mut sched = Scheduler::new().unwrap();
    let (rfd, wfd) = pipe();

    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    sched
        .add_read(rfd, None, false, move |_, activation| {
            *s.borrow_mut() = Some(activation.kind);
        })
        .unwrap();

    // Give the never-waiting read a near deadline; it must now time out.
    sched.requeue_read(rfd, Some(Duration::from_millis(20)));

    let start = std::time::Instant::now();
    run_until(&mut sched, || seen.borrow().is_some());
    assert_eq!(*seen.borrow(), Some(TaskKind::ReadTimeout));
    assert!(start.elapsed() < Duration::from_secs(30));

    unsafe {
        libc::close(rfd);
        libc::close(wfd);
    }
}

#[test]
fn closed_peer_dispatches_read_error() {
    let mut sched = Scheduler::new().unwrap();

    let mut fds = [0i32; 2];
    let res = unsafe {
        libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr())
    };
    assert_eq!(res, 0);
    let (sock, peer) = (fds[0], fds[1]);

    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    sched
        .add_read(sock, None, false, move |_, activation| {
            *s.borrow_mut() = Some(activation.kind);
        })
        .unwrap();

    // Closing the peer raises a hang-up on the watched socket.
    unsafe { libc::close(peer) };

    run_until(&mut sched, || seen.borrow().is_some());
    assert_eq!(*seen.borrow(), Some(TaskKind::ReadError));
    assert!(
        sched.registered_interest(sock).is_none(),
        "record must be destroyed on hang-up"
    );

    unsafe { libc::close(sock) };
}
