//! An event group: a 32-bit field tasks can wait on a combination of
//! (spec §4.5). Unlike the mutex/semaphore, releasing bits can satisfy
//! more than one waiter's distinct condition at once, so `set_bits` and
//! `clear_bits` sweep the whole pending queue rather than waking only its
//! head — see `DESIGN.md` for why this specializes the generic
//! "release wakes one waiter" framing.

use core::cell::Cell;
use core::marker::PhantomData;

use crate::error::Error;
use crate::port::Port;
use crate::scheduler;
use crate::sync::{self, SyncObject};
use crate::task::EventWait;

/// The condition under which a waiting task is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// All of the requested bits are set.
    AllSet,
    /// All of the requested bits are clear.
    AllClear,
    /// Any of the requested bits is set.
    AnySet,
    /// Any of the requested bits is clear.
    AnyClear,
}

fn satisfied(current: u32, target: u32, mode: TriggerMode) -> bool {
    match mode {
        TriggerMode::AllSet => current & target == target,
        TriggerMode::AllClear => current & target == 0,
        TriggerMode::AnySet => current & target != 0,
        TriggerMode::AnyClear => (!current) & target != 0,
    }
}

pub struct EventGroup<P: Port> {
    obj: SyncObject,
    bits: Cell<u32>,
    _p: PhantomData<P>,
}

unsafe impl<P: Port> Sync for EventGroup<P> {}

impl<P: Port> EventGroup<P> {
    pub const fn new(initial_bits: u32) -> Self {
        Self {
            obj: SyncObject::new(),
            bits: Cell::new(initial_bits),
            _p: PhantomData,
        }
    }

    pub fn init(&'static self) -> Result<(), Error> {
        P::kernel().sync_registry().add(&self.obj)
    }

    pub fn deinit(&'static self) -> Result<(), Error> {
        P::kernel().sync_registry().remove(&self.obj)
    }

    pub fn abort(&'static self, task: &'static crate::task::Task) -> Result<(), Error> {
        sync::abort::<P>(&self.obj, task)
    }

    pub fn get_bits(&self) -> u32 {
        self.bits.get()
    }

    /// Blocks until `bits`/`mode` is satisfied, or the timeout (0 =
    /// forever) elapses. Returns the bit pattern observed at wakeup.
    pub fn wait(&'static self, bits: u32, mode: TriggerMode, timeout_ms: u32) -> Result<u32, Error> {
        if !self.obj.is_initialized() {
            return Err(Error::Uninitialized);
        }
        P::critical_start();
        let cur = self.bits.get();
        if satisfied(cur, bits, mode) {
            P::critical_end();
            return Ok(cur);
        }
        P::critical_end();

        let kernel = P::kernel();
        let current = kernel.current().ok_or(Error::RunningTaskNull)?;
        current.set_event_wait(EventWait::waiting_for(bits, mode));

        sync::block_task::<P>(&self.obj, timeout_ms)?;
        Ok(current.event_wait().triggering_bits)
    }

    pub fn set_bits(&'static self, bits: u32) -> Result<(), Error> {
        if !self.obj.is_initialized() {
            return Err(Error::Uninitialized);
        }
        P::critical_start();
        self.bits.set(self.bits.get() | bits);
        let snapshot = self.bits.get();
        P::critical_end();
        self.wake_satisfied(snapshot);
        Ok(())
    }

    pub fn clear_bits(&'static self, bits: u32) -> Result<(), Error> {
        if !self.obj.is_initialized() {
            return Err(Error::Uninitialized);
        }
        P::critical_start();
        self.bits.set(self.bits.get() & !bits);
        let snapshot = self.bits.get();
        P::critical_end();
        self.wake_satisfied(snapshot);
        Ok(())
    }

    fn wake_satisfied(&'static self, snapshot: u32) {
        P::critical_start();
        let mut cur = self.obj.pending.head();
        let mut highest_woken: Option<&'static crate::task::Task> = None;
        while let Some(t) = cur {
            let next = t.link.next.get();
            let ev = t.event_wait();
            if satisfied(snapshot, ev.pending_bits, ev.mode) {
                t.set_event_wait(ev.with_triggering_bits(snapshot));
                self.obj.pending.remove(t);
                P::kernel().tasks().ready_task(t);
                highest_woken = match highest_woken {
                    Some(h) if h.priority() <= t.priority() => Some(h),
                    _ => Some(t),
                };
            }
            cur = next;
        }
        P::critical_end();
        if let Some(h) = highest_woken {
            scheduler::maybe_preempt::<P>(h);
        }
    }
}
