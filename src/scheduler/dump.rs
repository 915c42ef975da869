//! Human-readable dump of the scheduler's queues and indices.
//!
//! Introspection only: the format carries no behavioral contract.

use std::collections::VecDeque;
use std::fmt;

use crate::deadline::DeadlineQueue;
use crate::scheduler::Scheduler;
use crate::task::TaskRef;
use crate::utils::arena::Arena;

fn write_index(
    out: &mut dyn fmt::Write,
    name: &str,
    queue: &DeadlineQueue,
    arena: &Arena,
) -> fmt::Result {
    writeln!(out, "----[ begin index dump {name} ]----")?;
    for (i, (deadline, seq, task)) in queue.iter().enumerate() {
        match arena.get(task) {
            Some(item) => writeln!(
                out,
                "#{:02} {} {}, timer: {}, callback: {}, id {seq}",
                i + 1,
                item.kind.name(),
                item.payload,
                deadline,
                if item.callback.is_some() { "set" } else { "none" },
            )?,
            None => writeln!(out, "#{:02} <stale entry>, id {seq}", i + 1)?,
        }
    }
    writeln!(out, "----[ end index dump ]----")
}

fn write_queue(
    out: &mut dyn fmt::Write,
    name: &str,
    queue: &VecDeque<TaskRef>,
    arena: &Arena,
) -> fmt::Result {
    writeln!(out, "----[ begin queue dump {name} ]----")?;
    for (i, task) in queue.iter().enumerate() {
        match arena.get(*task) {
            Some(item) => writeln!(
                out,
                "#{:02} {} {}, callback: {}, id {}",
                i + 1,
                item.kind.name(),
                item.payload,
                if item.callback.is_some() { "set" } else { "none" },
                item.seq,
            )?,
            None => writeln!(out, "#{:02} <stale entry>", i + 1)?,
        }
    }
    writeln!(out, "----[ end queue dump ]----")
}

impl Scheduler {
    /// Writes a listing of all four deadline indices, both queues and the
    /// registered descriptor records.
    pub fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "scheduler: {} tasks live", self.arena.in_use())?;
        write_index(out, "read", &self.read, &self.arena)?;
        write_index(out, "write", &self.write, &self.arena)?;
        write_index(out, "timer", &self.timer, &self.arena)?;
        write_index(out, "child", &self.child, &self.arena)?;

        write_queue(out, "event", &self.event_queue, &self.arena)?;
        write_queue(out, "ready", &self.ready_queue, &self.arena)?;

        writeln!(out, "----[ begin record dump ]----")?;
        for (i, (fd, record)) in self.records.iter().enumerate() {
            writeln!(
                out,
                "#{:02} fd {fd}, interest {}, armed {}, registered {}, read {}, write {}",
                i + 1,
                record.interest,
                record.armed,
                record.registered,
                record.read.map_or("-".into(), |t| format!("#{}", t.index)),
                record.write.map_or("-".into(), |t| format!("#{}", t.index)),
            )?;
        }
        writeln!(out, "----[ end record dump ]----")
    }

    /// [`dump`](Scheduler::dump) into a fresh string.
    pub fn dump_to_string(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = self.dump(&mut out);
        out
    }
}
