//! A fixed-capacity, typed message queue backed by `heapless::Deque`
//! (grounded in `valibali-cluu`'s kernel, the one example repo in the
//! pack that depends on `heapless` for exactly this kind of no-alloc
//! bounded buffer).

use core::cell::UnsafeCell;
use core::marker::PhantomData;

use heapless::Deque;

use crate::error::Error;
use crate::port::Port;
use crate::sync::{self, SyncObject};
use crate::task::Task;

/// A bounded FIFO of `T`, holding up to `N` items. Two independent sync
/// objects back it: one for tasks blocked trying to send into a full
/// queue, one for tasks blocked trying to receive from an empty one.
pub struct MessageQueue<T, const N: usize, P: Port> {
    send_obj: SyncObject,
    recv_obj: SyncObject,
    buf: UnsafeCell<Deque<T, N>>,
    _p: PhantomData<P>,
}

// SAFETY: all access to `buf` happens with the kernel's critical section
// held, same as every other field behind a `Cell` elsewhere in the crate;
// `UnsafeCell` is used here only because `Deque`'s methods need `&mut`.
unsafe impl<T: Send, const N: usize, P: Port> Sync for MessageQueue<T, N, P> {}

impl<T, const N: usize, P: Port> MessageQueue<T, N, P> {
    pub const fn new() -> Self {
        Self {
            send_obj: SyncObject::new(),
            recv_obj: SyncObject::new(),
            buf: UnsafeCell::new(Deque::new()),
            _p: PhantomData,
        }
    }

    pub fn init(&'static self) -> Result<(), Error> {
        P::kernel().sync_registry().add(&self.send_obj)?;
        P::kernel().sync_registry().add(&self.recv_obj)?;
        Ok(())
    }

    pub fn deinit(&'static self) -> Result<(), Error> {
        P::kernel().sync_registry().remove(&self.send_obj)?;
        P::kernel().sync_registry().remove(&self.recv_obj)?;
        Ok(())
    }

    pub fn abort_sender(&'static self, task: &'static Task) -> Result<(), Error> {
        sync::abort::<P>(&self.send_obj, task)
    }

    pub fn abort_receiver(&'static self, task: &'static Task) -> Result<(), Error> {
        sync::abort::<P>(&self.recv_obj, task)
    }

    pub fn len(&self) -> usize {
        P::critical_start();
        // SAFETY: critical section held.
        let len = unsafe { (*self.buf.get()).len() };
        P::critical_end();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends `item`, blocking up to `timeout_ms` (0 = forever) if the
    /// queue is full.
    pub fn send(&'static self, item: T, timeout_ms: u32) -> Result<(), Error> {
        if !self.send_obj.is_initialized() {
            return Err(Error::Uninitialized);
        }
        let mut item = Some(item);
        loop {
            P::critical_start();
            // SAFETY: critical section held.
            let full = unsafe { (*self.buf.get()).is_full() };
            if !full {
                // SAFETY: critical section held; `item` is `Some` on
                // every iteration that reaches here.
                unsafe {
                    let _ = (*self.buf.get()).push_back(item.take().unwrap());
                }
                P::critical_end();
                sync::wake_head::<P>(&self.recv_obj);
                return Ok(());
            }
            P::critical_end();
            sync::block_task::<P>(&self.send_obj, timeout_ms)?;
        }
    }

    /// Receives an item, blocking up to `timeout_ms` (0 = forever) if the
    /// queue is empty.
    pub fn receive(&'static self, timeout_ms: u32) -> Result<T, Error> {
        if !self.recv_obj.is_initialized() {
            return Err(Error::Uninitialized);
        }
        loop {
            P::critical_start();
            // SAFETY: critical section held.
            let item = unsafe { (*self.buf.get()).pop_front() };
            P::critical_end();
            if let Some(item) = item {
                sync::wake_head::<P>(&self.send_obj);
                return Ok(item);
            }
            sync::block_task::<P>(&self.recv_obj, timeout_ms)?;
        }
    }
}
