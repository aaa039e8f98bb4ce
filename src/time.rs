//! Timekeeping, the tick ISR, and the delay/sleep API (spec §4.4).

use crate::error::Error;
use crate::port::Port;
use crate::scheduler;

pub(crate) fn ms_to_ticks(ms: u32, sys_clock_hz: u32) -> Result<u32, Error> {
    let ticks = (ms as u64)
        .checked_mul(sys_clock_hz as u64)
        .and_then(|v| v.checked_div(1000))
        .ok_or(Error::SleepDurationOutOfRange)?;
    u32::try_from(ticks).map_err(|_| Error::SleepDurationOutOfRange)
}

/// A human-friendly duration, converted to milliseconds with checked
/// arithmetic before being handed to [`delay`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Sleep {
    pub ms: u32,
    pub sec: u32,
    pub min: u32,
    pub hr: u32,
    pub days: u32,
}

impl Sleep {
    pub const fn from_ms(ms: u32) -> Self {
        Self { ms, sec: 0, min: 0, hr: 0, days: 0 }
    }

    fn total_ms(self) -> Option<u32> {
        self.ms
            .checked_add(self.sec.checked_mul(1_000)?)?
            .checked_add(self.min.checked_mul(60_000)?)?
            .checked_add(self.hr.checked_mul(3_600_000)?)?
            .checked_add(self.days.checked_mul(86_400_000)?)
    }
}

/// Puts the calling task to sleep for the given duration. A thin
/// convenience wrapper over [`delay`] that does the checked-overflow
/// addition spec §9 calls for up front, so callers get a clean
/// `SleepDurationOutOfRange` rather than a wrapped total.
pub fn sleep<P: Port>(duration: Sleep) -> Result<(), Error> {
    let ms = duration.total_ms().ok_or(Error::SleepDurationOutOfRange)?;
    delay::<P>(ms)
}

/// Delays the calling task for `ms` milliseconds. Illegal from interrupt
/// context, from the idle task, and from the timer task's own callback
/// (spec §5's illegal-context protections).
pub fn delay<P: Port>(ms: u32) -> Result<(), Error> {
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
    if ms == 0 {
        return Ok(());
    }
    let ticks = ms_to_ticks(ms, kernel.sys_clock_hz())?;

    P::critical_start();
    kernel.tasks().yield_task(current, ticks);
    P::critical_end();
    // The port's contract (see `Port::run_scheduler`) is to keep
    // interrupts masked until the *next* task actually begins executing,
    // even though the critical section above has textually ended: this
    // task's transition to yielded must stay atomic with the tick ISR
    // that will eventually decrement its timeout.
    scheduler::schedule::<P>();
    Ok(())
}

/// The tick interrupt handler. Firmware wires this to the architecture's
/// periodic timer interrupt (e.g. SysTick). Ordering is fixed (spec §4.4):
/// the optional user callback runs first and outside any critical section
/// (the same convention as a timer callback), then ticks advance and the
/// rest of the tick's bookkeeping follows under one.
pub fn tick<P: Port>() {
    let kernel = P::kernel();
    if let Some(hook) = kernel.tick_hook() {
        hook();
    }
    P::critical_start();
    kernel.advance_ticks();
    #[cfg(feature = "software-timers")]
    kernel.timer_service().on_tick::<P>();
    crate::sync::update_timeouts::<P>();
    kernel.tasks().update_delayed();
    kernel.tasks().cycle_active();
    P::critical_end();
    scheduler::schedule::<P>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_to_ticks_converts_at_a_1khz_clock() {
        assert_eq!(ms_to_ticks(1000, 1000).unwrap(), 1000);
        assert_eq!(ms_to_ticks(1, 1000).unwrap(), 1);
        assert_eq!(ms_to_ticks(0, 1000).unwrap(), 0);
    }

    #[test]
    fn ms_to_ticks_rejects_overflow() {
        assert_eq!(ms_to_ticks(u32::MAX, u32::MAX), Err(Error::SleepDurationOutOfRange));
    }

    #[test]
    fn sleep_total_ms_sums_every_field() {
        let s = Sleep { ms: 500, sec: 1, min: 1, hr: 0, days: 0 };
        assert_eq!(s.total_ms(), Some(500 + 1_000 + 60_000));
    }

    #[test]
    fn sleep_total_ms_rejects_overflow() {
        let s = Sleep { days: u32::MAX, ..Default::default() };
        assert_eq!(s.total_ms(), None);
    }
}
