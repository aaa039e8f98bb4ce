//! A concrete Cortex-M architecture port, built on `cortex-m` /
//! `cortex-m-rt` / `critical-section`, matching the teacher's
//! `r3_port_arm_m`. Illustrative: it wires SysTick and PendSV the way a
//! real Cortex-M RTOS port does, but hasn't been validated against real
//! silicon the way a production port would be.
//!
//! A firmware crate targeting Cortex-M defines its own unit struct,
//! implements [`crate::port::Port`] for it by delegating the
//! architecture-specific pieces below, and declares exactly one
//! `static KERNEL: Kernel<MyPort>`.

use cortex_m::peripheral::{syst::SystClkSource, SCB, SYST};

use crate::port::ClockConfig;

/// Programs SysTick to fire at 1 kHz (one tick per millisecond) off the
/// core clock, and sets PendSV to the lowest exception priority so a
/// context-switch request never preempts a higher-priority ISR.
///
/// # Safety
///
/// Must be called exactly once, during `start_os`, before interrupts are
/// unmasked.
pub unsafe fn init_systick_and_pendsv(syst: &mut SYST, scb: &mut SCB, clock: &ClockConfig) {
    syst.set_clock_source(SystClkSource::Core);
    let reload = clock.sys_clock_hz / 1000;
    syst.set_reload(reload.saturating_sub(1));
    syst.clear_current();
    syst.enable_counter();
    syst.enable_interrupt();

    // SAFETY: PendSV is given the lowest priority so it never runs ahead
    // of a genuine fault or a higher-priority peripheral ISR.
    scb.set_priority(cortex_m::peripheral::scb::SystemHandler::PendSV, 0xFF);
}

/// Requests a PendSV exception, which the firmware's `PendSV` handler
/// turns into an actual context switch. Matches spec §6's
/// `run_scheduler` contract: this returns once the calling context's
/// task is running again.
pub fn request_pendsv() {
    SCB::set_pendsv();
    cortex_m::asm::isb();
}

/// Enters a critical section by masking interrupts with BASEPRI/PRIMASK,
/// matching the `critical-section` crate's single-core Cortex-M backend.
pub fn enter_critical() -> critical_section::RawRestoreState {
    // SAFETY: paired with a single matching `exit_critical` call by the
    // caller, per `critical_section::Impl`'s contract.
    unsafe { critical_section::acquire() }
}

/// Leaves a critical section entered with [`enter_critical`].
///
/// # Safety
///
/// `state` must be the value returned by the `enter_critical` call this
/// pairs with.
pub unsafe fn exit_critical(state: critical_section::RawRestoreState) {
    critical_section::release(state);
}
