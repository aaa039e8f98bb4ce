use core::fmt;

/// The single error type returned by every fallible kernel entry point.
///
/// Flat and non-generic by design: each operation already says which of
/// these can occur in its own doc comment, so splitting this into one
/// per-operation enum (the way some kernels do) would only replicate the
/// same handful of variants under different names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Called from interrupt context where only ISR-safe primitives are
    /// permitted.
    IllegalInterruptAccess,
    /// Called from the idle task, which may never block, yield or exit.
    IllegalIdleTask,
    /// Called from the timer task while it is running a timer callback.
    IllegalTimerTask,
    /// The kernel's running task is null; `start_os` was never called, or
    /// this was invoked before the first context restore.
    RunningTaskNull,

    /// The sync object (mutex, semaphore, event group, queue) has already
    /// been initialized.
    Reinitialized,
    /// The sync object has not been initialized.
    Uninitialized,
    /// Attempted to deinitialize a sync object that still has tasks
    /// blocked on it.
    TaskPendingOnSync,
    /// `abort` named a task that is not currently blocked on this object.
    TaskNotBlockedBySync,

    /// The calling task already owns this mutex.
    MutexOwnerAcquire,
    /// `unlock` was called by a task that does not own the mutex.
    InvalidMutexOwner,

    /// A millisecond duration converts to a tick count, or a `Sleep`
    /// duration's total, that overflows the kernel's time representation.
    SleepDurationOutOfRange,
    /// The blocking call's timeout elapsed before it was satisfied.
    TimedOut,
    /// The blocking call was cancelled by `abort` before it was satisfied.
    Aborted,

    /// `resume` was called on a task that is not suspended.
    IllegalTaskResume,

    /// `start`/`restart`/`set` was given (or the timer already carries) a
    /// zero-millisecond period.
    TimeoutCannotBeZero,
    /// `start` or `set` was called on a timer that is already running.
    TimerRunning,
    /// `stop` was called on a timer that is not running.
    TimerNotRunning,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::IllegalInterruptAccess => "illegal call from interrupt context",
            Error::IllegalIdleTask => "illegal call from the idle task",
            Error::IllegalTimerTask => "illegal call from the timer task's callback",
            Error::RunningTaskNull => "kernel has no running task",
            Error::Reinitialized => "object already initialized",
            Error::Uninitialized => "object not initialized",
            Error::TaskPendingOnSync => "a task is still pending on this object",
            Error::TaskNotBlockedBySync => "task is not blocked on this object",
            Error::MutexOwnerAcquire => "task already owns this mutex",
            Error::InvalidMutexOwner => "caller does not own this mutex",
            Error::SleepDurationOutOfRange => "duration overflows the tick representation",
            Error::TimedOut => "timed out",
            Error::Aborted => "aborted",
            Error::IllegalTaskResume => "task is not suspended",
            Error::TimeoutCannotBeZero => "timer period must be nonzero",
            Error::TimerRunning => "timer is already running",
            Error::TimerNotRunning => "timer is not running",
        };
        f.write_str(msg)
    }
}
