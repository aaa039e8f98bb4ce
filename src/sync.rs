//! The shared blocking/timeout/abort protocol every synchronization
//! primitive (mutex, semaphore, event group, message queue) is built on
//! top of (spec §4.5).

use core::cell::Cell;

use crate::error::Error;
use crate::list::TaskQueue;
use crate::port::Port;
use crate::scheduler;
use crate::task::{Task, TaskState};
use crate::time::ms_to_ticks;

/// The common header every sync primitive embeds: a pending queue and
/// registry linkage. Primitives compose this rather than inheriting from
/// it, the same way the teacher's `WaitQueue` is a field of `MutexCb`,
/// `SemaphoreCb`, etc. rather than a supertype.
pub struct SyncObject {
    pub(crate) pending: TaskQueue,
    initialized: Cell<bool>,
    next_in_registry: Cell<Option<&'static SyncObject>>,
}

// SAFETY: same single-core, critical-section discipline as `Task`.
unsafe impl Sync for SyncObject {}

impl SyncObject {
    pub const fn new() -> Self {
        Self {
            pending: TaskQueue::new(),
            initialized: Cell::new(false),
            next_in_registry: Cell::new(None),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }
}

/// A singly-linked registry of every live sync object, used only so that
/// the tick ISR can walk every pending queue once per tick to decrement
/// timeouts, without each primitive needing its own tick hook.
pub(crate) struct SyncRegistry {
    head: Cell<Option<&'static SyncObject>>,
}

unsafe impl Sync for SyncRegistry {}

impl SyncRegistry {
    pub const fn new() -> Self {
        Self { head: Cell::new(None) }
    }

    pub fn add(&'static self, obj: &'static SyncObject) -> Result<(), Error> {
        if obj.initialized.get() {
            return Err(Error::Reinitialized);
        }
        obj.next_in_registry.set(self.head.get());
        self.head.set(Some(obj));
        obj.initialized.set(true);
        Ok(())
    }

    pub fn remove(&'static self, obj: &'static SyncObject) -> Result<(), Error> {
        if !obj.initialized.get() {
            return Err(Error::Uninitialized);
        }
        if !obj.pending.is_empty() {
            return Err(Error::TaskPendingOnSync);
        }
        match self.head.get() {
            Some(h) if core::ptr::eq(h, obj) => self.head.set(obj.next_in_registry.get()),
            _ => {
                let mut cur = self.head.get();
                while let Some(c) = cur {
                    if let Some(n) = c.next_in_registry.get() {
                        if core::ptr::eq(n, obj) {
                            c.next_in_registry.set(obj.next_in_registry.get());
                            break;
                        }
                    }
                    cur = c.next_in_registry.get();
                }
            }
        }
        obj.initialized.set(false);
        obj.next_in_registry.set(None);
        Ok(())
    }
}

/// Blocks the calling task on `obj` until woken, aborted, or timed out.
/// `timeout_ms == 0` waits indefinitely.
pub(crate) fn block_task<P: Port>(obj: &'static SyncObject, timeout_ms: u32) -> Result<(), Error> {
    if P::interrupt_active() {
        return Err(Error::IllegalInterruptAccess);
    }
    let kernel = P::kernel();
    let current = kernel.current().ok_or(Error::RunningTaskNull)?;
    if core::ptr::eq(current, kernel.idle_task()) {
        return Err(Error::IllegalIdleTask);
    }
    #[cfg(feature = "software-timers")]
    if kernel.timer_service().in_callback() {
        return Err(Error::IllegalTimerTask);
    }
    let ticks = if timeout_ms == 0 {
        0
    } else {
        ms_to_ticks(timeout_ms, kernel.sys_clock_hz())?
    };

    P::critical_start();
    kernel.tasks().pop_running();
    obj.pending.insert_sorted(current);
    current.timeout.set(ticks);
    current.set_state(TaskState::Blocked);
    current.sync.aborted.set(false);
    current.sync.timed_out.set(false);
    P::critical_end();
    scheduler::schedule::<P>();

    // Resumed here once woken, aborted, or timed out.
    if current.sync.timed_out.replace(false) {
        log::trace!("task '{}' timed out waiting", current.name());
        return Err(Error::TimedOut);
    }
    if current.sync.aborted.replace(false) {
        log::trace!("task '{}' wait aborted", current.name());
        return Err(Error::Aborted);
    }
    Ok(())
}

/// Wakes the highest-priority waiter on `obj`, if any, and requests a
/// reschedule if it outranks the currently running task. Used by
/// primitives (semaphore `give`, mutex `unlock`) whose release always
/// hands off to exactly one waiter.
pub(crate) fn wake_head<P: Port>(obj: &'static SyncObject) -> Option<&'static Task> {
    P::critical_start();
    let woken = obj.pending.pop();
    if let Some(t) = woken {
        P::kernel().tasks().ready_task(t);
    }
    P::critical_end();
    if let Some(t) = woken {
        scheduler::maybe_preempt::<P>(t);
    }
    woken
}

/// Cancels a specific task's wait on `obj` (spec's `abort`), waking it
/// with `Error::Aborted` regardless of where in the pending queue it sits.
pub(crate) fn abort<P: Port>(obj: &'static SyncObject, task: &'static Task) -> Result<(), Error> {
    if !obj.initialized.get() {
        return Err(Error::Uninitialized);
    }
    P::critical_start();
    let blocked_here = matches!(task.link.queue.get(), Some(q) if core::ptr::eq(q, &obj.pending as *const TaskQueue));
    if !blocked_here {
        P::critical_end();
        return Err(Error::TaskNotBlockedBySync);
    }
    task.sync.aborted.set(true);
    P::kernel().tasks().ready_task(task);
    P::critical_end();
    scheduler::maybe_preempt::<P>(task);
    Ok(())
}

/// Walks every registered sync object's pending queue once per tick,
/// decrementing finite timeouts and waking any task that reaches zero.
pub(crate) fn update_timeouts<P: Port>() {
    let mut obj = P::kernel().sync_registry().head.get();
    while let Some(o) = obj {
        let mut cur = o.pending.head();
        while let Some(t) = cur {
            let next = t.link.next.get();
            let remaining = t.timeout.get();
            if remaining > 0 {
                let remaining = remaining - 1;
                t.timeout.set(remaining);
                if remaining == 0 {
                    t.sync.timed_out.set(true);
                    P::kernel().tasks().ready_task(t);
                }
            }
            cur = next;
        }
        obj = o.next_in_registry.get();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskConfig, TaskStack};

    #[test]
    fn reinitializing_is_rejected() {
        static REG: SyncRegistry = SyncRegistry::new();
        static OBJ: SyncObject = SyncObject::new();
        REG.add(&OBJ).unwrap();
        assert_eq!(REG.add(&OBJ), Err(Error::Reinitialized));
        REG.remove(&OBJ).unwrap();
    }

    #[test]
    fn removing_an_object_with_a_pending_task_is_rejected() {
        fn body() -> crate::TaskResult {
            Ok(())
        }
        static STACK: TaskStack<32> = TaskStack::new();
        static REG: SyncRegistry = SyncRegistry::new();
        static OBJ: SyncObject = SyncObject::new();
        let t = Box::leak(Box::new(Task::create(TaskConfig {
            name: "t",
            stack: STACK.region(),
            subroutine: body,
            exit_handler: None,
            priority: 1,
        })));

        REG.add(&OBJ).unwrap();
        OBJ.pending.push_back(t);
        assert_eq!(REG.remove(&OBJ), Err(Error::TaskPendingOnSync));

        OBJ.pending.remove(t);
        REG.remove(&OBJ).unwrap();
    }

    #[test]
    fn removing_from_the_middle_of_the_registry_preserves_the_rest() {
        static REG: SyncRegistry = SyncRegistry::new();
        static A: SyncObject = SyncObject::new();
        static B: SyncObject = SyncObject::new();
        static C: SyncObject = SyncObject::new();
        REG.add(&A).unwrap();
        REG.add(&B).unwrap();
        REG.add(&C).unwrap();

        REG.remove(&B).unwrap();
        REG.remove(&C).unwrap();
        REG.remove(&A).unwrap();
    }
}
