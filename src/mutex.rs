//! A mutex with priority inheritance (spec §4.5's shared protocol,
//! specialized with single-level priority inheritance rather than the
//! teacher's ceiling protocol — see `DESIGN.md`).

use core::cell::Cell;
use core::marker::PhantomData;

use crate::error::Error;
use crate::port::Port;
use crate::sync::{self, SyncObject};
use crate::task::Task;

fn reprioritize<P: Port>(t: &'static Task, new_priority: u8) {
    use crate::task::TaskState;
    match t.state() {
        TaskState::Ready => {
            P::kernel().tasks().detach(t);
            t.priority.set(new_priority);
            P::kernel().tasks().ready_task(t);
        }
        TaskState::Blocked => {
            if let Some(q) = t.link.queue.get() {
                q.remove(t);
                t.priority.set(new_priority);
                q.insert_sorted(t);
            }
        }
        _ => t.priority.set(new_priority),
    }
}

/// A mutual-exclusion lock. The owner's effective priority is raised to
/// that of any higher-priority task that blocks waiting for it, and
/// restored to its base priority on release, preventing unbounded
/// priority inversion.
pub struct Mutex<P: Port> {
    obj: SyncObject,
    owner: Cell<Option<&'static Task>>,
    _p: PhantomData<P>,
}

unsafe impl<P: Port> Sync for Mutex<P> {}

impl<P: Port> Mutex<P> {
    pub const fn new() -> Self {
        Self {
            obj: SyncObject::new(),
            owner: Cell::new(None),
            _p: PhantomData,
        }
    }

    pub fn init(&'static self) -> Result<(), Error> {
        P::kernel().sync_registry().add(&self.obj)
    }

    pub fn deinit(&'static self) -> Result<(), Error> {
        P::kernel().sync_registry().remove(&self.obj)
    }

    /// Cancels `task`'s pending wait on this mutex, if any.
    pub fn abort(&'static self, task: &'static Task) -> Result<(), Error> {
        sync::abort::<P>(&self.obj, task)
    }

    pub fn owner(&self) -> Option<&'static Task> {
        self.owner.get()
    }

    /// Acquires the mutex, blocking up to `timeout_ms` (0 = forever).
    pub fn lock(&'static self, timeout_ms: u32) -> Result<(), Error> {
        if !self.obj.is_initialized() {
            return Err(Error::Uninitialized);
        }
        loop {
            let kernel = P::kernel();
            let current = kernel.current().ok_or(Error::RunningTaskNull)?;

            P::critical_start();
            let owner = self.owner.get();
            match owner {
                None => {
                    self.owner.set(Some(current));
                    P::critical_end();
                    log::trace!("task '{}' acquired mutex", current.name());
                    return Ok(());
                }
                Some(o) if core::ptr::eq(o, current) => {
                    P::critical_end();
                    return Err(Error::MutexOwnerAcquire);
                }
                Some(o) => {
                    if current.priority() < o.priority() {
                        reprioritize::<P>(o, current.priority());
                        log::trace!("task '{}' inherits priority {}", o.name(), current.priority());
                    }
                    P::critical_end();
                }
            }

            sync::block_task::<P>(&self.obj, timeout_ms)?;
            // Woken because the mutex was handed to us directly by
            // `unlock`, or because we need to re-race for it; either way
            // loop back and check ownership again.
        }
    }

    /// Releases the mutex. Only the owner may call this.
    pub fn unlock(&'static self) -> Result<(), Error> {
        let kernel = P::kernel();
        let current = kernel.current().ok_or(Error::RunningTaskNull)?;

        P::critical_start();
        match self.owner.get() {
            Some(o) if core::ptr::eq(o, current) => {}
            _ => {
                P::critical_end();
                return Err(Error::InvalidMutexOwner);
            }
        }
        self.owner.set(None);
        P::critical_end();

        let restore_to = current.base_priority.get();
        if current.priority() != restore_to {
            reprioritize::<P>(current, restore_to);
        }

        // Wake the highest-priority waiter, if any; it re-enters `lock`'s
        // loop and claims ownership itself (`owner` is already `None`),
        // rather than being handed the mutex here under a second,
        // separately-timed critical section.
        sync::wake_head::<P>(&self.obj);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port_test::TestPort;
    use crate::task::{TaskConfig, TaskStack};

    fn body() -> crate::TaskResult {
        Ok(())
    }

    fn leak_task(priority: u8, stack: &'static TaskStack<32>) -> &'static Task {
        Box::leak(Box::new(Task::create(TaskConfig {
            name: "t",
            stack: stack.region(),
            subroutine: body,
            exit_handler: None,
            priority,
        })))
    }

    #[test]
    fn uncontended_lock_and_unlock_round_trips() {
        let _g = crate::port_test::guard();
        static STACK: TaskStack<32> = TaskStack::new();
        static MTX: Mutex<TestPort> = Mutex::new();
        MTX.init().unwrap();
        let t = leak_task(5, &STACK);
        TestPort::kernel().set_current(Some(t));

        MTX.lock(0).unwrap();
        assert_eq!(MTX.owner(), Some(t));
        MTX.unlock().unwrap();
        assert_eq!(MTX.owner(), None);

        TestPort::kernel().set_current(None);
        MTX.deinit().unwrap();
    }

    #[test]
    fn relocking_the_current_owner_is_rejected() {
        let _g = crate::port_test::guard();
        static STACK: TaskStack<32> = TaskStack::new();
        static MTX: Mutex<TestPort> = Mutex::new();
        MTX.init().unwrap();
        let t = leak_task(5, &STACK);
        TestPort::kernel().set_current(Some(t));

        MTX.lock(0).unwrap();
        assert_eq!(MTX.lock(0), Err(Error::MutexOwnerAcquire));
        MTX.unlock().unwrap();

        TestPort::kernel().set_current(None);
        MTX.deinit().unwrap();
    }

    #[test]
    fn unlocking_without_owning_is_rejected() {
        let _g = crate::port_test::guard();
        static STACK: TaskStack<32> = TaskStack::new();
        static MTX: Mutex<TestPort> = Mutex::new();
        MTX.init().unwrap();
        let t = leak_task(5, &STACK);
        TestPort::kernel().set_current(Some(t));

        assert_eq!(MTX.unlock(), Err(Error::InvalidMutexOwner));

        TestPort::kernel().set_current(None);
        MTX.deinit().unwrap();
    }
}
