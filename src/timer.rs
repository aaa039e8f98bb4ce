//! The software timer service (spec §4.6): a dedicated timer task that
//! runs user callbacks outside interrupt context, driven by a semaphore
//! rather than by self-requeuing delays — the variant spec §9 calls for
//! specifically because it stays deterministic under tick jitter (a
//! self-delay-driven timer task's next wakeup drifts by however late the
//! previous tick's processing ran).

use core::cell::Cell;
use core::marker::PhantomData;

use crate::error::Error;
use crate::port::Port;
use crate::semaphore::Semaphore;
use crate::task::{Task, TaskResult};

/// A timer's lifecycle state (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Not armed.
    Idle,
    /// Armed and counting down.
    Running,
    /// Counted down to zero; waiting for the timer task to run its
    /// callback.
    Expired,
}

/// A software timer. Lives in caller-owned `'static` storage, the same
/// as a `Task`.
pub struct Timer {
    name: &'static str,
    callback: Cell<fn(&'static Timer)>,
    period_ms: Cell<u32>,
    autoreload: Cell<bool>,
    state: Cell<TimerState>,
    delta: Cell<u32>,
    prev: Cell<Option<&'static Timer>>,
    next: Cell<Option<&'static Timer>>,
}

unsafe impl Sync for Timer {}

/// Parameters for a software timer.
pub struct TimerConfig {
    pub name: &'static str,
    pub period_ms: u32,
    pub autoreload: bool,
    pub callback: fn(&'static Timer),
}

/// Parameters for reconfiguring a timer via [`Timer::set`]. `callback` is
/// `None` to leave the current callback untouched.
pub struct TimerSet {
    pub period_ms: u32,
    pub autoreload: bool,
    pub callback: Option<fn(&'static Timer)>,
}

impl Timer {
    pub const fn create(config: TimerConfig) -> Timer {
        Timer {
            name: config.name,
            callback: Cell::new(config.callback),
            period_ms: Cell::new(config.period_ms),
            autoreload: Cell::new(config.autoreload),
            state: Cell::new(TimerState::Idle),
            delta: Cell::new(0),
            prev: Cell::new(None),
            next: Cell::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state.get(), TimerState::Running)
    }

    /// The timer's current lifecycle state.
    pub fn state(&self) -> TimerState {
        self.state.get()
    }

    /// Milliseconds remaining until expiry, or `None` if the timer is not
    /// currently running.
    pub fn remaining_ms<P: Port>(&'static self) -> Option<u32> {
        P::critical_start();
        let remaining = if self.state.get() == TimerState::Running {
            P::kernel().timer_service().running.remaining_until(self)
        } else {
            None
        };
        P::critical_end();
        remaining
    }

    /// Arms the timer for its configured period. Errors if the period is
    /// zero, or if it is already running.
    pub fn start<P: Port>(&'static self) -> Result<(), Error> {
        if self.period_ms.get() == 0 {
            return Err(Error::TimeoutCannotBeZero);
        }
        P::critical_start();
        if self.state.get() == TimerState::Running {
            P::critical_end();
            return Err(Error::TimerRunning);
        }
        self.state.set(TimerState::Running);
        P::kernel().timer_service().running.schedule(self, self.period_ms.get());
        P::critical_end();
        Ok(())
    }

    /// Disarms the timer. Errors if it is already idle.
    pub fn stop<P: Port>(&'static self) -> Result<(), Error> {
        P::critical_start();
        if self.state.get() != TimerState::Running {
            P::critical_end();
            return Err(Error::TimerNotRunning);
        }
        P::kernel().timer_service().running.remove(self);
        self.state.set(TimerState::Idle);
        P::critical_end();
        Ok(())
    }

    /// Re-arms the timer for its configured period, from either the idle
    /// or the running state, resetting its countdown. Errors if the period
    /// is zero.
    pub fn restart<P: Port>(&'static self) -> Result<(), Error> {
        if self.period_ms.get() == 0 {
            return Err(Error::TimeoutCannotBeZero);
        }
        P::critical_start();
        if self.state.get() == TimerState::Running {
            P::kernel().timer_service().running.remove(self);
        }
        self.state.set(TimerState::Running);
        P::kernel().timer_service().running.schedule(self, self.period_ms.get());
        P::critical_end();
        Ok(())
    }

    /// Reconfigures the period, autoreload flag and (optionally) the
    /// callback. Errors if the timer is currently running: stop it first.
    pub fn set<P: Port>(&'static self, params: TimerSet) -> Result<(), Error> {
        P::critical_start();
        if self.state.get() == TimerState::Running {
            P::critical_end();
            return Err(Error::TimerRunning);
        }
        self.period_ms.set(params.period_ms);
        self.autoreload.set(params.autoreload);
        if let Some(cb) = params.callback {
            self.callback.set(cb);
        }
        P::critical_end();
        Ok(())
    }
}

/// A doubly-linked, delta-encoded list of running timers, ordered by
/// expiry: each entry's `delta` is ticks remaining *after* the previous
/// entry expires, so advancing time by one tick only ever touches the
/// head, keeping per-tick work O(1) and expiry detection O(k) in the
/// number of timers that actually expire that tick.
struct DeltaList {
    head: Cell<Option<&'static Timer>>,
}

unsafe impl Sync for DeltaList {}

impl DeltaList {
    const fn new() -> Self {
        Self { head: Cell::new(None) }
    }

    fn schedule(&'static self, t: &'static Timer, remaining_ms: u32) {
        let mut cur = self.head.get();
        let mut prev: Option<&'static Timer> = None;
        let mut acc: u32 = 0;
        while let Some(c) = cur {
            let new_acc = acc.saturating_add(c.delta.get());
            if new_acc > remaining_ms {
                t.delta.set(remaining_ms - acc);
                c.delta.set(new_acc - remaining_ms);
                break;
            }
            acc = new_acc;
            prev = Some(c);
            cur = c.next.get();
        }
        if cur.is_none() {
            t.delta.set(remaining_ms - acc);
        }
        t.prev.set(prev);
        t.next.set(cur);
        match prev {
            Some(p) => p.next.set(Some(t)),
            None => self.head.set(Some(t)),
        }
        if let Some(c) = cur {
            c.prev.set(Some(t));
        }
    }

    /// Removes `t`, which callers must already know is a member of this
    /// list (every call site checks `Timer`'s own `Running` state first).
    fn remove(&'static self, t: &'static Timer) {
        let prev = t.prev.get();
        let next = t.next.get();
        if let Some(n) = next {
            n.delta.set(n.delta.get() + t.delta.get());
            n.prev.set(prev);
        }
        match prev {
            Some(p) => p.next.set(next),
            None => self.head.set(next),
        }
        t.prev.set(None);
        t.next.set(None);
        t.delta.set(0);
    }

    /// Sums deltas from the head up to and including `target`, giving the
    /// ticks remaining until it expires. `None` if `target` isn't a member
    /// of this list.
    fn remaining_until(&'static self, target: &'static Timer) -> Option<u32> {
        let mut cur = self.head.get();
        let mut acc: u32 = 0;
        while let Some(c) = cur {
            acc = acc.saturating_add(c.delta.get());
            if core::ptr::eq(c, target) {
                return Some(acc);
            }
            cur = c.next.get();
        }
        None
    }

    /// Decrements the head's delta by one tick.
    fn tick(&'static self) {
        if let Some(h) = self.head.get() {
            let d = h.delta.get();
            if d > 0 {
                h.delta.set(d - 1);
            }
        }
    }

    /// Detaches and returns the head if its delta has reached zero.
    fn pop_expired(&'static self) -> Option<&'static Timer> {
        let h = self.head.get()?;
        if h.delta.get() != 0 {
            return None;
        }
        self.head.set(h.next.get());
        if let Some(n) = h.next.get() {
            n.prev.set(None);
        }
        h.prev.set(None);
        h.next.set(None);
        Some(h)
    }
}

/// A plain FIFO, reusing `Timer`'s `prev`/`next` fields: a timer is never
/// in both the running delta-list and the expired FIFO at once.
struct TimerFifo {
    head: Cell<Option<&'static Timer>>,
    tail: Cell<Option<&'static Timer>>,
}

unsafe impl Sync for TimerFifo {}

impl TimerFifo {
    const fn new() -> Self {
        Self { head: Cell::new(None), tail: Cell::new(None) }
    }

    fn push_back(&'static self, t: &'static Timer) {
        t.prev.set(self.tail.get());
        t.next.set(None);
        match self.tail.get() {
            Some(old) => old.next.set(Some(t)),
            None => self.head.set(Some(t)),
        }
        self.tail.set(Some(t));
    }

    fn pop_front(&'static self) -> Option<&'static Timer> {
        let h = self.head.get()?;
        self.head.set(h.next.get());
        match h.next.get() {
            Some(n) => n.prev.set(None),
            None => self.tail.set(None),
        }
        h.prev.set(None);
        h.next.set(None);
        Some(h)
    }

    fn is_empty(&self) -> bool {
        self.head.get().is_none()
    }
}

/// The timer service: the running/expired lists, the semaphore the timer
/// task blocks on, and the flag that makes `delay`/`block_task` reject
/// calls made from inside a running callback (spec §5).
pub(crate) struct TimerService<P: Port> {
    running: DeltaList,
    expired: TimerFifo,
    sem: Semaphore<P>,
    callback_execution: Cell<bool>,
    task: Cell<Option<&'static Task>>,
}

unsafe impl<P: Port> Sync for TimerService<P> {}

impl<P: Port> TimerService<P> {
    pub const fn new() -> Self {
        Self {
            running: DeltaList::new(),
            expired: TimerFifo::new(),
            sem: Semaphore::new(0, u32::MAX),
            callback_execution: Cell::new(false),
            task: Cell::new(None),
        }
    }

    pub(crate) fn in_callback(&self) -> bool {
        self.callback_execution.get()
    }

    pub(crate) fn task(&self) -> Option<&'static Task> {
        self.task.get()
    }

    pub(crate) fn set_task(&self, task: &'static Task) {
        self.task.set(Some(task));
    }

    /// Called once per tick, with the critical section already held.
    pub(crate) fn on_tick(&'static self) {
        self.running.tick();
        while let Some(t) = self.running.pop_expired() {
            t.state.set(TimerState::Expired);
            self.expired.push_back(t);
        }
        if !self.expired.is_empty() {
            let _ = self.sem.give();
        }
    }

    /// The timer task's body: waits for expired timers and runs their
    /// callbacks, outside of any critical section.
    pub(crate) fn run_forever(&'static self) -> ! {
        loop {
            if self.sem.take(0).is_err() {
                continue;
            }
            while let Some(t) = self.expired.pop_front() {
                self.callback_execution.set(true);
                (t.callback.get())(t);
                self.callback_execution.set(false);
                if t.autoreload.get() {
                    t.state.set(TimerState::Running);
                    self.running.schedule(t, t.period_ms.get());
                } else {
                    t.state.set(TimerState::Idle);
                }
            }
        }
    }
}

/// The timer task's subroutine, installed as the dedicated timer task's
/// entry point by `Kernel::start_os` when `software-timers` is enabled.
pub(crate) fn timer_task_main<P: Port>() -> TaskResult {
    P::kernel().timer_service().run_forever();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(name: &'static str, period_ms: u32, autoreload: bool) -> Timer {
        fn cb(_t: &'static Timer) {}
        Timer::create(TimerConfig { name, period_ms, autoreload, callback: cb })
    }

    #[test]
    fn delta_list_orders_by_absolute_expiry() {
        static LIST: DeltaList = DeltaList::new();
        let a = Box::leak(Box::new(timer("a", 100, false)));
        let b = Box::leak(Box::new(timer("b", 100, false)));
        let c = Box::leak(Box::new(timer("c", 100, false)));

        LIST.schedule(a, 30);
        LIST.schedule(b, 10);
        LIST.schedule(c, 20);

        // expiry order: b (10), c (20), a (30)
        assert_eq!(LIST.head.get().unwrap().name(), "b");
        assert_eq!(b.delta.get(), 10);
        assert_eq!(c.delta.get(), 10); // 20 - 10
        assert_eq!(a.delta.get(), 10); // 30 - 20
    }

    #[test]
    fn delta_list_tick_and_pop_expired_fire_in_order() {
        static LIST: DeltaList = DeltaList::new();
        let a = Box::leak(Box::new(timer("a", 100, false)));
        let b = Box::leak(Box::new(timer("b", 100, false)));
        LIST.schedule(a, 2);
        LIST.schedule(b, 5);

        LIST.tick();
        assert!(LIST.pop_expired().is_none());
        LIST.tick();
        let expired = LIST.pop_expired().unwrap();
        assert_eq!(expired.name(), "a");
        assert!(LIST.pop_expired().is_none());

        for _ in 0..3 {
            LIST.tick();
        }
        let expired = LIST.pop_expired().unwrap();
        assert_eq!(expired.name(), "b");
    }

    #[test]
    fn delta_list_remove_redistributes_the_gap() {
        static LIST: DeltaList = DeltaList::new();
        let a = Box::leak(Box::new(timer("a", 100, false)));
        let b = Box::leak(Box::new(timer("b", 100, false)));
        LIST.schedule(a, 10);
        LIST.schedule(b, 25);
        assert_eq!(b.delta.get(), 15);

        LIST.remove(a);
        assert_eq!(b.delta.get(), 25);
        assert_eq!(LIST.head.get().unwrap().name(), "b");
    }

    #[test]
    fn delta_list_remaining_until_sums_the_chain() {
        static LIST: DeltaList = DeltaList::new();
        let a = Box::leak(Box::new(timer("a", 100, false)));
        let b = Box::leak(Box::new(timer("b", 100, false)));
        LIST.schedule(a, 10);
        LIST.schedule(b, 25);

        assert_eq!(LIST.remaining_until(a), Some(10));
        assert_eq!(LIST.remaining_until(b), Some(25));

        let c = Box::leak(Box::new(timer("c", 100, false)));
        assert_eq!(LIST.remaining_until(c), None);
    }

    #[test]
    fn timer_fifo_is_plain_fifo_order() {
        static FIFO: TimerFifo = TimerFifo::new();
        let a = Box::leak(Box::new(timer("a", 1, false)));
        let b = Box::leak(Box::new(timer("b", 1, false)));
        assert!(FIFO.is_empty());
        FIFO.push_back(a);
        FIFO.push_back(b);
        assert_eq!(FIFO.pop_front().unwrap().name(), "a");
        assert_eq!(FIFO.pop_front().unwrap().name(), "b");
        assert!(FIFO.is_empty());
    }
}
