use scheduler::Scheduler;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Runs the dispatch loop until `done()` reports true, with a generous
/// safety bound so a broken scheduler fails instead of hanging.
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
fn earlier_timer_fires_first() {
    let mut sched = Scheduler::new().unwrap();
    let order: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));

    let o = order.clone();
    sched.add_timer(Some(Duration::from_millis(100)), move |_, _| {
        o.borrow_mut().push(100);
    });
    let o = order.clone();
    sched.add_timer(Some(Duration::from_millis(50)), move |_, _| {
        o.borrow_mut().push(50);
    });

    run_until(&mut sched, || order.borrow().len() == 2);
    assert_eq!(*order.borrow(), vec![50, 100]);
}

#[test]
fn timers_dispatch_in_non_decreasing_deadline_order() {
    let mut sched = Scheduler::new().unwrap();
    let order: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::new()));

    for ms in [30u64, 10, 20, 10, 1] {
        let o = order.clone();
        sched.add_timer(Some(Duration::from_millis(ms)), move |_, _| {
            o.borrow_mut().push(ms);
        });
    }

    run_until(&mut sched, || order.borrow().len() == 5);

    let fired = order.borrow();
    for pair in fired.windows(2) {
        assert!(pair[0] <= pair[1], "fired out of order: {fired:?}");
    }
}

#[test]
fn update_timer_repositions_pending_timer() {
    let mut sched = Scheduler::new().unwrap();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let o = order.clone();
    let slow = sched.add_timer(Some(Duration::from_secs(600)), move |_, _| {
        o.borrow_mut().push("updated");
    });
    let o = order.clone();
    sched.add_timer(Some(Duration::from_millis(40)), move |_, _| {
        o.borrow_mut().push("fixed");
    });

    // Pull the far-away timer in front of the 40 ms one.
    sched.update_timer(slow, Some(Duration::from_millis(5)));

    run_until(&mut sched, || order.borrow().len() == 2);
    assert_eq!(*order.borrow(), vec!["updated", "fixed"]);
}

#[test]
fn never_timer_does_not_block_other_deadlines() {
    let mut sched = Scheduler::new().unwrap();
    let fired = Rc::new(RefCell::new(false));

    sched.add_timer(None, |_, _| {
        panic!("timer without a deadline must not fire");
    });
    let f = fired.clone();
    sched.add_timer(Some(Duration::from_millis(30)), move |_, _| {
        *f.borrow_mut() = true;
    });

    let start = std::time::Instant::now();
    run_until(&mut sched, || *fired.borrow());
    assert!(
        start.elapsed() < Duration::from_secs(30),
        "never-deadline item was treated as a wake candidate"
    );
}
