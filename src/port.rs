//! The architecture port seam.
//!
//! A `Port` implementation is the only architecture-specific code the
//! kernel depends on. It is a zero-sized type (typically a unit struct)
//! that carries no state of its own: all kernel state lives in the
//! [`crate::Kernel<P>`] singleton that [`Port::kernel`] points back to.
//! This mirrors how the teacher's `Traits: KernelTraits` type parameter
//! stands in for the whole architecture without ever being instantiated.

use crate::task::Task;
use crate::Kernel;

/// A raw, caller-owned stack region handed to [`crate::Task::create`].
///
/// Built from a [`crate::TaskStack`] (or, for the idle task, from the
/// `idle_stack` slice passed to [`crate::Kernel::start_os`]). Holding a raw
/// pointer rather than a `&'static mut [usize]` lets [`crate::TaskStack`]
/// be a `const fn`-constructible `static`: forming a long-lived mutable
/// reference to another `static`'s storage from within a `static`
/// initializer is not something the language allows, but computing a raw
/// pointer into it is.
#[derive(Clone, Copy)]
pub struct StackRegion {
    pub base: *mut usize,
    pub len: usize,
}

/// Clock parameters handed to [`Port::core_init`] at `start_os` time.
#[derive(Clone, Copy)]
pub struct ClockConfig {
    pub sys_clock_hz: u32,
}

/// The architecture-specific half of the kernel.
///
/// # Safety
///
/// Implementations must uphold the critical-section and stack-layout
/// contracts documented on each method: every kernel data structure that a
/// `Port` method touches is mutated through a `Cell` under the assumption
/// that `critical_start`/`critical_end` provide mutual exclusion with
/// every other context (task or interrupt) that can touch the same data.
pub unsafe trait Port: Sized + 'static {
    /// Returns the single, statically-allocated kernel instance associated
    /// with this port. Firmware crates implement this as `&KERNEL` where
    /// `KERNEL` is a `static Kernel<Self>` declared alongside the `impl`.
    fn kernel() -> &'static Kernel<Self>;

    /// Disables whatever interrupt sources can reenter the kernel
    /// (typically the tick interrupt and any ISR calling kernel
    /// functions), entering a critical section. Calls may nest; only the
    /// outermost `critical_end` call actually re-enables interrupts.
    fn critical_start();

    /// Leaves a critical section entered with `critical_start`.
    fn critical_end();

    /// Reports whether the caller is currently executing in interrupt
    /// context, used to enforce the "illegal call from interrupt context"
    /// guard described in spec §5.
    fn interrupt_active() -> bool;

    /// One-time architecture bring-up performed by `start_os` before the
    /// first task is scheduled (e.g. programming the tick timer).
    fn core_init(clock: &ClockConfig);

    /// Writes the initial exception/register frame for `task` into its
    /// stack, so that the first context restore resumes execution at
    /// [`crate::task_entry`] with `task` as its argument (not directly at
    /// the task's own subroutine, so the exit handler still runs if the
    /// subroutine returns). Called exactly once per task, from
    /// [`crate::Task::init`].
    ///
    /// # Safety
    ///
    /// `task`'s stack region must be valid, word-aligned, and not
    /// currently in use.
    unsafe fn init_stack(task: &'static Task);

    /// Requests a context switch. `Self::kernel().current()` already names
    /// the new target by the time this is called; the implementation
    /// saves the outgoing task's stack pointer (if any) and restores the
    /// incoming one via [`crate::Task::sp`]/[`crate::Task::set_sp`]. On the
    /// very first call (from `start_os`) this performs the initial context
    /// restore and does not return; on every subsequent call it returns
    /// once the calling context's task becomes the running task again.
    fn run_scheduler();

    /// Reports whether a debugger is attached, consulted only on the
    /// (unreachable in correct operation) fatal-halt path in `start_os`.
    fn is_debug_attached() -> bool {
        false
    }

    /// The minimum stack size, in words, the port requires for any task
    /// (enough to hold one exception frame plus callee-saved registers).
    fn min_stack_words() -> usize {
        16
    }
}
