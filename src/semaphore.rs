//! A counting semaphore built on the shared blocking protocol.

use core::cell::Cell;
use core::marker::PhantomData;

use crate::error::Error;
use crate::port::Port;
use crate::sync::{self, SyncObject};
use crate::task::Task;

pub struct Semaphore<P: Port> {
    obj: SyncObject,
    count: Cell<u32>,
    max: u32,
    _p: PhantomData<P>,
}

unsafe impl<P: Port> Sync for Semaphore<P> {}

impl<P: Port> Semaphore<P> {
    pub const fn new(initial: u32, max: u32) -> Self {
        Self {
            obj: SyncObject::new(),
            count: Cell::new(initial),
            max,
            _p: PhantomData,
        }
    }

    pub fn init(&'static self) -> Result<(), Error> {
        P::kernel().sync_registry().add(&self.obj)
    }

    pub fn deinit(&'static self) -> Result<(), Error> {
        P::kernel().sync_registry().remove(&self.obj)
    }

    pub fn abort(&'static self, task: &'static Task) -> Result<(), Error> {
        sync::abort::<P>(&self.obj, task)
    }

    pub fn count(&self) -> u32 {
        self.count.get()
    }

    /// Takes one count, blocking up to `timeout_ms` (0 = forever) if the
    /// count is currently zero.
    pub fn take(&'static self, timeout_ms: u32) -> Result<(), Error> {
        if !self.obj.is_initialized() {
            return Err(Error::Uninitialized);
        }
        loop {
            P::critical_start();
            let count = self.count.get();
            if count > 0 {
                self.count.set(count - 1);
                P::critical_end();
                return Ok(());
            }
            P::critical_end();
            sync::block_task::<P>(&self.obj, timeout_ms)?;
        }
    }

    /// Gives one count, waking the highest-priority waiter if any. Saturates
    /// silently at `max` rather than erroring, matching a plain counting
    /// semaphore's usual give-without-overflow-error behavior.
    pub fn give(&'static self) -> Result<(), Error> {
        if !self.obj.is_initialized() {
            return Err(Error::Uninitialized);
        }
        P::critical_start();
        let count = self.count.get();
        if count < self.max {
            self.count.set(count + 1);
        }
        P::critical_end();
        sync::wake_head::<P>(&self.obj);
        Ok(())
    }

    /// Identical to [`Semaphore::give`]; named separately because it is
    /// the entry point meant to be called from interrupt context (it
    /// never blocks, so it's always ISR-safe).
    pub fn give_from_isr(&'static self) -> Result<(), Error> {
        self.give()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port_test::TestPort;

    #[test]
    fn saturates_at_max_without_erroring() {
        let _g = crate::port_test::guard();
        static SEM: Semaphore<TestPort> = Semaphore::new(0, 1);
        SEM.init().unwrap();
        SEM.give().unwrap();
        SEM.give().unwrap();
        assert_eq!(SEM.count(), 1);
        SEM.deinit().unwrap();
    }
}
