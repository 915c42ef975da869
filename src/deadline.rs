//! Absolute wake times and the deadline-ordered task index.
//!
//! Every waiting task carries a [`Deadline`]: either an absolute instant or
//! `Never`, which sorts after every concrete instant and is skipped when the
//! next wake-up is computed. The scheduler keeps one [`DeadlineQueue`] per
//! waitable class (read, write, timer, child).

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::task::TaskRef;

/// Absolute point in time at which a waiting task times out.
///
/// `Never` is the "no timeout" sentinel. It orders after every `At(_)`
/// value, so items that never expire always sit at the back of a
/// [`DeadlineQueue`] and are excluded from wake-up computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Deadline {
    At(Instant),
    Never,
}

impl Deadline {
    /// Converts a relative timeout into an absolute deadline.
    /// `None` means the task never times out.
    pub fn after(timeout: Option<Duration>) -> Self {
        match timeout {
            Some(delay) => Deadline::At(Instant::now() + delay),
            None => Deadline::Never,
        }
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Deadline::Never)
    }

    /// True once the deadline has been reached. `Never` never expires.
    pub(crate) fn expired(&self, now: Instant) -> bool {
        match self {
            Deadline::At(at) => *at <= now,
            Deadline::Never => false,
        }
    }

    /// The instant to wake at, unless this deadline never fires.
    pub(crate) fn wake_at(&self) -> Option<Instant> {
        match self {
            Deadline::At(at) => Some(*at),
            Deadline::Never => None,
        }
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deadline::Never => write!(f, "NEVER"),
            Deadline::At(at) => {
                let now = Instant::now();
                if let Some(left) = at.checked_duration_since(now) {
                    write!(f, "{}.{:06}", left.as_secs(), left.subsec_micros())
                } else {
                    let past = now.duration_since(*at);
                    write!(f, "-{}.{:06}", past.as_secs(), past.subsec_micros())
                }
            }
        }
    }
}

/// Tasks ordered by deadline, earliest first.
///
/// Keys are `(deadline, sequence number)`, so two tasks with the same
/// deadline dispatch in registration order. Repositioning an entry is a
/// remove followed by an insert under its new key.
pub(crate) struct DeadlineQueue {
    entries: BTreeMap<(Deadline, u64), TaskRef>,
}

impl DeadlineQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, deadline: Deadline, seq: u64, task: TaskRef) {
        self.entries.insert((deadline, seq), task);
    }

    pub(crate) fn remove(&mut self, deadline: Deadline, seq: u64) -> Option<TaskRef> {
        self.entries.remove(&(deadline, seq))
    }

    /// The earliest entry, if any.
    pub(crate) fn first(&self) -> Option<(Deadline, u64, TaskRef)> {
        self.entries
            .first_key_value()
            .map(|(&(deadline, seq), &task)| (deadline, seq, task))
    }

    /// The instant of the earliest concrete deadline. `None` when the queue
    /// is empty or its earliest entry never expires.
    pub(crate) fn next_wake(&self) -> Option<Instant> {
        self.first().and_then(|(deadline, _, _)| deadline.wake_at())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (Deadline, u64, TaskRef)> + '_ {
        self.entries
            .iter()
            .map(|(&(deadline, seq), &task)| (deadline, seq, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn task(n: u32) -> TaskRef {
        TaskRef {
            index: n,
            generation: 0,
        }
    }

    #[test]
    fn never_orders_last() {
        let now = Instant::now();
        assert!(Deadline::At(now + Duration::from_secs(1_000_000)) < Deadline::Never);

        let mut queue = DeadlineQueue::new();
        queue.insert(Deadline::Never, 1, task(1));
        queue.insert(Deadline::At(now + Duration::from_millis(5)), 2, task(2));

        let (first, _, t) = queue.first().unwrap();
        assert_eq!(t, task(2));
        assert!(!first.is_never());
        assert_eq!(queue.next_wake(), Some(now + Duration::from_millis(5)));
    }

    #[test]
    fn next_wake_skips_never_only_queue() {
        let mut queue = DeadlineQueue::new();
        queue.insert(Deadline::Never, 1, task(1));
        queue.insert(Deadline::Never, 2, task(2));
        assert_eq!(queue.next_wake(), None);
    }

    #[test]
    fn reposition_moves_entry() {
        let now = Instant::now();
        let mut queue = DeadlineQueue::new();
        queue.insert(Deadline::At(now + Duration::from_secs(10)), 1, task(1));
        queue.insert(Deadline::At(now + Duration::from_secs(20)), 2, task(2));

        queue.remove(Deadline::At(now + Duration::from_secs(10)), 1);
        queue.insert(Deadline::At(now + Duration::from_secs(30)), 1, task(1));

        let (_, _, first) = queue.first().unwrap();
        assert_eq!(first, task(2));
        assert!(!queue.is_empty());
    }

    proptest! {
        #[test]
        fn drains_in_non_decreasing_order(offsets in prop::collection::vec(0u64..10_000, 1..64)) {
            let base = Instant::now();
            let mut queue = DeadlineQueue::new();
            for (i, off) in offsets.iter().enumerate() {
                queue.insert(
                    Deadline::At(base + Duration::from_millis(*off)),
                    i as u64,
                    task(i as u32),
                );
            }

            let mut last = None;
            while let Some((deadline, seq, _)) = queue.first() {
                queue.remove(deadline, seq);
                if let Some(prev) = last {
                    prop_assert!(prev <= deadline);
                }
                last = Some(deadline);
            }
        }
    }
}
