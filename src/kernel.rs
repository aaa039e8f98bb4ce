//! The top-level kernel singleton (spec §4.7) and its lifecycle API.
//!
//! Rather than threading a `&Kernel` handle through every call the way a
//! dynamically-dispatched kernel would, `Kernel<P>` state is reached
//! through `P::kernel()`: the concrete `Port` implementation a firmware
//! crate writes is a zero-sized type that simply points back at its one
//! `static Kernel<P>`. This keeps every public method's signature free of
//! an explicit kernel parameter while still being entirely monomorphized,
//! matching the teacher's own `Traits: KernelTraits` association (kernel
//! functions are associated functions of `Traits`, never passed a
//! `&Kernel` value either).

use core::cell::Cell;
use core::marker::PhantomData;

use crate::port::{ClockConfig, Port, StackRegion};
use crate::scheduler;
use crate::sync::SyncRegistry;
use crate::task::{Task, IDLE_PRIORITY};
use crate::task_control::TaskControl;

#[cfg(feature = "software-timers")]
use crate::timer::TimerService;

/// Parameters for [`Kernel::start_os`].
pub struct StartConfig {
    pub idle_stack: &'static mut [usize],
    pub sys_clock_hz: u32,
    /// Runs first, before anything else, on every tick (spec §4.4 step 1).
    /// Called outside any critical section, the same as a timer callback.
    pub tick_hook: Option<fn()>,
    #[cfg(feature = "software-timers")]
    pub timer_task_stack: &'static mut [usize],
    #[cfg(feature = "software-timers")]
    pub timer_task_priority: u8,
}

pub struct Kernel<P: Port> {
    tasks: TaskControl,
    sync_registry: SyncRegistry,
    ticks: Cell<u64>,
    sys_clock_hz: Cell<u32>,
    tick_hook: Cell<Option<fn()>>,
    current: Cell<Option<&'static Task>>,
    started: Cell<bool>,
    idle_task: Task,
    #[cfg(feature = "software-timers")]
    timer_task: Task,
    #[cfg(feature = "software-timers")]
    timer_service: TimerService<P>,
    _p: PhantomData<P>,
}

// SAFETY: same single-core, critical-section discipline as every other
// kernel structure.
unsafe impl<P: Port> Sync for Kernel<P> {}

impl<P: Port> Kernel<P> {
    pub const fn new() -> Self {
        Self {
            tasks: TaskControl::new(),
            sync_registry: SyncRegistry::new(),
            ticks: Cell::new(0),
            sys_clock_hz: Cell::new(0),
            tick_hook: Cell::new(None),
            current: Cell::new(None),
            started: Cell::new(false),
            idle_task: Task::create_late_bound("idle", crate::task::idle_main, IDLE_PRIORITY),
            #[cfg(feature = "software-timers")]
            timer_task: Task::create_late_bound("timer", crate::timer::timer_task_main::<P>, 0),
            #[cfg(feature = "software-timers")]
            timer_service: TimerService::new(),
            _p: PhantomData,
        }
    }

    pub(crate) fn tasks(&'static self) -> &'static TaskControl {
        &self.tasks
    }

    pub(crate) fn sync_registry(&'static self) -> &'static SyncRegistry {
        &self.sync_registry
    }

    /// The task a [`Port`]'s context-switch code should treat as the
    /// target of the next (or current) restore. `None` only before the
    /// first switch performed by [`Kernel::start_os`].
    pub fn current(&self) -> Option<&'static Task> {
        self.current.get()
    }

    pub(crate) fn set_current(&self, task: Option<&'static Task>) {
        self.current.set(task);
    }

    pub(crate) fn idle_task(&'static self) -> &'static Task {
        &self.idle_task
    }

    #[cfg(feature = "software-timers")]
    pub(crate) fn timer_service(&'static self) -> &'static TimerService<P> {
        &self.timer_service
    }

    pub(crate) fn sys_clock_hz(&self) -> u32 {
        self.sys_clock_hz.get()
    }

    pub(crate) fn tick_hook(&self) -> Option<fn()> {
        self.tick_hook.get()
    }

    pub fn is_started(&self) -> bool {
        self.started.get()
    }

    pub fn get_ticks(&self) -> u64 {
        self.ticks.get()
    }

    pub fn get_ticks_ms(&self) -> u64 {
        let hz = self.sys_clock_hz.get().max(1) as u64;
        self.ticks.get().saturating_mul(1000) / hz
    }

    pub(crate) fn advance_ticks(&self) {
        self.ticks.set(self.ticks.get() + 1);
    }

    /// Brings the kernel up: binds and initializes the idle (and, with
    /// `software-timers`, timer) task, programs the architecture's tick
    /// timer, and performs the first context restore. On real hardware
    /// this never returns; it is declared to return normally so that a
    /// second, idempotent call (or a hosted test harness) can observe it
    /// coming back.
    pub fn start_os(&'static self, config: StartConfig) {
        if self.started.get() {
            return;
        }

        assert!(
            config.idle_stack.len() >= P::min_stack_words(),
            "echo: idle stack too small ({} words, need at least {})",
            config.idle_stack.len(),
            P::min_stack_words(),
        );

        self.tick_hook.set(config.tick_hook);

        let idle_region = StackRegion {
            base: config.idle_stack.as_mut_ptr(),
            len: config.idle_stack.len(),
        };
        self.idle_task.bind_stack(idle_region);
        let _ = self.idle_task.init::<P>();
        self.tasks.ready_task(&self.idle_task);

        #[cfg(feature = "software-timers")]
        {
            self.timer_task.bind_priority(config.timer_task_priority);
            let timer_region = StackRegion {
                base: config.timer_task_stack.as_mut_ptr(),
                len: config.timer_task_stack.len(),
            };
            self.timer_task.bind_stack(timer_region);
            let _ = self.timer_task.init::<P>();
            self.timer_service.set_task(&self.timer_task);
            self.tasks.ready_task(&self.timer_task);
        }

        self.sys_clock_hz.set(config.sys_clock_hz);
        P::core_init(&ClockConfig { sys_clock_hz: config.sys_clock_hz });

        self.started.set(true);
        log::debug!("kernel started, sys_clock_hz={}", config.sys_clock_hz);

        // `current()` is still `None` here; this is the call that picks
        // the idle task (or a higher-priority one, if it raced to ready
        // before `start_os` ran) and performs the very first context
        // switch.
        scheduler::schedule::<P>();

        // Reached only if that switch returned, which should be
        // impossible: there is no previous task context for control to
        // return into.
        if P::is_debug_attached() {
            loop {
                core::hint::spin_loop();
            }
        } else {
            panic!("echo: run_scheduler returned unexpectedly from start_os");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port_test::TestPort;

    #[test]
    fn ticks_advance_monotonically() {
        static K: Kernel<TestPort> = Kernel::new();
        assert_eq!(K.get_ticks(), 0);
        K.advance_ticks();
        K.advance_ticks();
        assert_eq!(K.get_ticks(), 2);
    }

    #[test]
    fn get_ticks_ms_converts_using_sys_clock_hz() {
        static K: Kernel<TestPort> = Kernel::new();
        K.sys_clock_hz.set(1000);
        for _ in 0..500 {
            K.advance_ticks();
        }
        assert_eq!(K.get_ticks_ms(), 500);
    }

    #[test]
    fn is_started_reflects_start_os_lifecycle() {
        // `start_os` reaches the scheduler through `P::kernel()`, so this
        // must run against the real singleton, not a standalone instance.
        let _g = crate::port_test::guard();
        let k = TestPort::kernel();
        static mut IDLE_STACK: [usize; 64] = [0; 64];

        if k.is_started() {
            // A prior test in this binary already booted the shared
            // singleton; `start_os` is idempotent, so just confirm that.
            k.start_os(StartConfig { idle_stack: &mut [], sys_clock_hz: 4242, tick_hook: None });
            assert_ne!(k.sys_clock_hz(), 4242);
            return;
        }

        // SAFETY: sole access to this static for the duration of the
        // test, serialized by the guard above.
        let idle_stack: &'static mut [usize] = unsafe { &mut *core::ptr::addr_of_mut!(IDLE_STACK) };
        k.start_os(StartConfig { idle_stack, sys_clock_hz: 1000, tick_hook: None });
        assert!(k.is_started());
        assert_eq!(k.sys_clock_hz(), 1000);

        // Idempotent: a second call is a no-op, not a re-initialization.
        k.start_os(StartConfig { idle_stack: &mut [], sys_clock_hz: 9999, tick_hook: None });
        assert_eq!(k.sys_clock_hz(), 1000);
    }
}
