//! The scheduling decision (spec §4.3): after any readiness change, figure
//! out which task should run next and ask the port for a context switch
//! only if that's actually a different task.

use crate::port::Port;
use crate::task::{Task, TaskState};

/// Re-evaluates the ready bitmap and requests a context switch if the
/// winner differs from the task that's currently running.
pub(crate) fn schedule<P: Port>() {
    let kernel = P::kernel();
    let current = kernel.current();
    let Some(next) = kernel.tasks().set_next_running() else {
        // Nothing is ready yet (pre-idle-ready startup); nothing to do.
        return;
    };
    let switch = match current {
        None => true,
        Some(c) => !core::ptr::eq(c, next),
    };
    if switch {
        if let Some(c) = current {
            if c.state() == TaskState::Running {
                c.set_state(TaskState::Ready);
            }
        }
        next.set_state(TaskState::Running);
        kernel.set_current(Some(next));
        log::trace!("context switch -> '{}'", next.name());
        P::run_scheduler();
    }
}

/// Called after a readiness change that did not itself go through the
/// running task (e.g. `resume`, a semaphore `give`, a mutex `unlock`
/// handoff): requests a reschedule only if the newly-ready task
/// outranks whatever's currently running.
pub(crate) fn maybe_preempt<P: Port>(woken: &'static Task) {
    let kernel = P::kernel();
    let caller_priority = kernel.current().map(|c| c.priority()).unwrap_or(u8::MAX);
    if woken.priority() < caller_priority {
        schedule::<P>();
    }
}
