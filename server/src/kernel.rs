//! Process control and timers, provided by the kernel.

use crate::error::PagerError;
use crate::ipc::ThreadId;
use crate::mem::Pid;

pub trait ProcessControl {
    /// The process a thread belongs to, if it still exists.
    fn process_of(&self, thread: ThreadId) -> Option<Pid>;

    /// Wakes a thread blocked on a fault.
    fn reply(&mut self, thread: ThreadId);

    /// Kills a process. The pager releases its resources itself right after.
    fn terminate(&mut self, pid: Pid, reason: PagerError);
}

/// Opaque value handed back in [`crate::Event::Alarm`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlarmCookie(pub u64);

pub trait AlarmClock {
    /// Arranges for `Event::Alarm(cookie)` to be delivered after `micros`.
    fn register_delay(&mut self, micros: u64, cookie: AlarmCookie);

    /// Microseconds since boot.
    fn now(&self) -> u64;
}
