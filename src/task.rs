//! The task control block and its public lifecycle API (spec §3, §4.2, §6).

use core::cell::Cell;
use core::fmt;

use crate::list::TaskQueue;
use crate::port::{Port, StackRegion};

/// The fixed priority level reserved for the idle task. User tasks use
/// `0..IDLE_PRIORITY`; lower numbers run first.
pub const IDLE_PRIORITY: u8 = 32;

/// Number of priority levels, including the idle level.
pub const NUM_PRIORITIES: usize = IDLE_PRIORITY as usize + 1;

/// A task's externally observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Uninitialized,
    Ready,
    Running,
    Yielded,
    Blocked,
    Suspended,
}

/// The result type a task subroutine returns.
pub type TaskResult = Result<(), TaskError>;

/// An error returned by a task subroutine to its exit handler, distinct
/// from [`crate::Error`] because a subroutine has nothing kernel-specific
/// to report: it's an application-defined failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskError(pub u32);

/// A caller-owned, statically allocated task stack of `N` words.
///
/// `const fn`-constructible so it can live in a `static`:
/// ```ignore
/// static STACK: TaskStack<256> = TaskStack::new();
/// ```
pub struct TaskStack<const N: usize>(core::cell::UnsafeCell<[usize; N]>);

// SAFETY: the only access to the interior is through `region()`, which
// hands out a raw pointer; the kernel is solely responsible for every
// subsequent read/write to the region, serialized the same way every
// other task-owned resource is.
unsafe impl<const N: usize> Sync for TaskStack<N> {}

impl<const N: usize> TaskStack<N> {
    pub const fn new() -> Self {
        Self(core::cell::UnsafeCell::new([0; N]))
    }

    /// Returns a raw description of this stack's storage, suitable for
    /// [`TaskConfig::stack`].
    pub const fn region(&'static self) -> StackRegion {
        StackRegion {
            base: self.0.get() as *mut usize,
            len: N,
        }
    }
}

/// Parameters for [`Task::create`].
pub struct TaskConfig {
    pub name: &'static str,
    pub stack: StackRegion,
    pub subroutine: fn() -> TaskResult,
    pub exit_handler: Option<fn(&'static Task, TaskResult)>,
    pub priority: u8,
}

/// Linkage fields used by [`crate::list::TaskQueue`]. Broken out of `Task`
/// so the queue implementation doesn't need to know about any other task
/// field.
pub(crate) struct TaskLink {
    pub(crate) prev: Cell<Option<&'static Task>>,
    pub(crate) next: Cell<Option<&'static Task>>,
    pub(crate) queue: Cell<Option<&'static TaskQueue>>,
}

impl TaskLink {
    const fn new() -> Self {
        Self {
            prev: Cell::new(None),
            next: Cell::new(None),
            queue: Cell::new(None),
        }
    }
}

/// Per-task scratch space used by the shared blocking protocol (spec
/// §4.5) while the task is pending on a sync object.
pub(crate) struct SyncCtx {
    pub(crate) aborted: Cell<bool>,
    pub(crate) timed_out: Cell<bool>,
    pub(crate) event: Cell<EventWait>,
}

impl SyncCtx {
    const fn new() -> Self {
        Self {
            aborted: Cell::new(false),
            timed_out: Cell::new(false),
            event: Cell::new(EventWait::new()),
        }
    }
}

/// The event-group wait condition a blocked task is holding, and (once
/// satisfied) the bits that triggered its wakeup.
#[derive(Clone, Copy)]
pub(crate) struct EventWait {
    pub(crate) pending_bits: u32,
    pub(crate) triggering_bits: u32,
    pub(crate) mode: crate::event::TriggerMode,
}

impl EventWait {
    const fn new() -> Self {
        Self {
            pending_bits: 0,
            triggering_bits: 0,
            mode: crate::event::TriggerMode::AnySet,
        }
    }

    pub(crate) fn waiting_for(bits: u32, mode: crate::event::TriggerMode) -> Self {
        Self { pending_bits: bits, triggering_bits: 0, mode }
    }

    pub(crate) fn with_triggering_bits(self, bits: u32) -> Self {
        Self { triggering_bits: bits, ..self }
    }
}

/// The task control block.
///
/// Placed in caller-owned `'static` storage; the kernel never allocates a
/// `Task`. Interior mutability via `Cell` stands in for the teacher's
/// token-enforced `CpuLockCell`: every field here is documented as "must
/// only be touched from within a critical section" rather than having
/// that enforced by the type system, which is the simplification this
/// crate's generic design makes in exchange for dropping the unstable
/// const-generic bitmap machinery the teacher's kernel relies on.
pub struct Task {
    name: &'static str,
    stack_base: Cell<*mut usize>,
    stack_len: Cell<usize>,
    sp: Cell<*mut ()>,
    init: Cell<bool>,
    pub(crate) state: Cell<TaskState>,
    pub(crate) base_priority: Cell<u8>,
    pub(crate) priority: Cell<u8>,
    /// Remaining ticks: nonzero while yielded (delay) or blocked with a
    /// finite timeout; zero means "blocked indefinitely" when the state
    /// is `Blocked`, or "not delayed" otherwise.
    pub(crate) timeout: Cell<u32>,
    pub(crate) link: TaskLink,
    pub(crate) sync: SyncCtx,
    subroutine: Cell<fn() -> TaskResult>,
    exit_handler: Cell<Option<fn(&'static Task, TaskResult)>>,
}

// SAFETY: single-core kernel; every mutable access to a `Task` happens
// either from the owning task's own execution context or from within a
// critical section entered via `Port::critical_start`.
unsafe impl Sync for Task {}
unsafe impl Send for Task {}

impl Task {
    /// Builds a task control block. Does not yet touch the stack: call
    /// [`Task::init`] before the task can be scheduled.
    pub const fn create(config: TaskConfig) -> Task {
        Task {
            name: config.name,
            stack_base: Cell::new(config.stack.base),
            stack_len: Cell::new(config.stack.len),
            sp: Cell::new(core::ptr::null_mut()),
            init: Cell::new(false),
            state: Cell::new(TaskState::Uninitialized),
            base_priority: Cell::new(config.priority),
            priority: Cell::new(config.priority),
            timeout: Cell::new(0),
            link: TaskLink::new(),
            sync: SyncCtx::new(),
            subroutine: Cell::new(config.subroutine),
            exit_handler: Cell::new(config.exit_handler),
        }
    }

    /// Builds a task whose stack is bound later via [`Task::bind_stack`],
    /// for the kernel's own idle and timer tasks: neither has a stack
    /// available at the time the enclosing `Kernel<P>` is
    /// const-constructed, since both come from `StartConfig` at
    /// `start_os` time.
    pub(crate) const fn create_late_bound(name: &'static str, subroutine: fn() -> TaskResult, priority: u8) -> Task {
        Task {
            name,
            stack_base: Cell::new(core::ptr::null_mut()),
            stack_len: Cell::new(0),
            sp: Cell::new(core::ptr::null_mut()),
            init: Cell::new(false),
            state: Cell::new(TaskState::Uninitialized),
            base_priority: Cell::new(priority),
            priority: Cell::new(priority),
            timeout: Cell::new(0),
            link: TaskLink::new(),
            sync: SyncCtx::new(),
            subroutine: Cell::new(subroutine),
            exit_handler: Cell::new(None),
        }
    }

    pub(crate) fn bind_stack(&self, region: StackRegion) {
        self.stack_base.set(region.base);
        self.stack_len.set(region.len);
    }

    /// Sets this task's priority before it has been initialized, for the
    /// kernel's own late-bound tasks (idle, timer) whose final priority
    /// is only known at `start_os` time.
    pub(crate) fn bind_priority(&self, priority: u8) {
        self.base_priority.set(priority);
        self.priority.set(priority);
    }

    /// Fills the stack with the watermark sentinel and has the port lay
    /// down the initial exception frame. Idempotent: a second call is a
    /// no-op.
    pub fn init<P: Port>(&'static self) -> Result<(), crate::Error> {
        if self.init.get() {
            return Ok(());
        }
        let base = self.stack_base.get();
        let len = self.stack_len.get();
        for i in 0..len {
            // SAFETY: `base..base+len` is this task's exclusively owned
            // stack region, not yet in use (first init).
            unsafe {
                core::ptr::write_volatile(base.add(i), 0xDEADC0DEusize);
            }
        }
        // SAFETY: region is valid and unused, per the precondition above.
        unsafe {
            P::init_stack(self);
        }
        self.init.set(true);
        self.state.set(TaskState::Suspended);
        log::trace!("task '{}' initialized", self.name);
        Ok(())
    }

    /// Detaches the task from any queue and marks it uninitialized, so
    /// `init` may be called again with a fresh (or the same) stack.
    pub fn deinit<P: Port>(&'static self) -> Result<(), crate::Error> {
        P::critical_start();
        P::kernel().tasks().remove_task(self);
        self.init.set(false);
        self.state.set(TaskState::Uninitialized);
        P::critical_end();
        log::trace!("task '{}' deinitialized", self.name);
        Ok(())
    }

    /// Moves a suspended task to ready. Readies it immediately ahead of
    /// the currently running task if its priority is higher.
    pub fn resume<P: Port>(&'static self) -> Result<(), crate::Error> {
        P::critical_start();
        if self.state.get() != TaskState::Suspended {
            P::critical_end();
            return Err(crate::Error::IllegalTaskResume);
        }
        P::kernel().tasks().ready_task(self);
        P::critical_end();
        log::trace!("task '{}' resumed", self.name);
        crate::scheduler::maybe_preempt::<P>(self);
        Ok(())
    }

    /// Moves the task to suspended, regardless of its current state
    /// (ready, blocked, or yielded). Reschedules if this suspended the
    /// running task.
    pub fn suspend<P: Port>(&'static self) -> Result<(), crate::Error> {
        P::critical_start();
        let was_running = matches!(P::kernel().current(), Some(c) if core::ptr::eq(c, self));
        P::kernel().tasks().suspend_task(self);
        P::critical_end();
        log::trace!("task '{}' suspended", self.name);
        if was_running {
            crate::scheduler::schedule::<P>();
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn priority(&self) -> u8 {
        self.priority.get()
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.set(state);
    }

    /// The task's saved stack pointer. A concrete [`Port`]'s context-switch
    /// code reads and writes this directly; the kernel itself never
    /// dereferences it.
    pub fn sp(&self) -> *mut () {
        self.sp.get()
    }

    /// Overwrites the task's saved stack pointer. Only a [`Port`]'s own
    /// context-switch code should call this.
    pub fn set_sp(&self, sp: *mut ()) {
        self.sp.set(sp);
    }

    /// The base of this task's stack region, for [`Port::init_stack`]
    /// implementations that need to lay out the initial exception frame.
    pub fn stack_base(&self) -> *mut usize {
        self.stack_base.get()
    }

    /// The length, in words, of this task's stack region.
    pub fn stack_len(&self) -> usize {
        self.stack_len.get()
    }

    pub(crate) fn subroutine(&self) -> fn() -> TaskResult {
        self.subroutine.get()
    }

    pub(crate) fn exit_handler(&self) -> Option<fn(&'static Task, TaskResult)> {
        self.exit_handler.get()
    }

    pub(crate) fn event_wait(&self) -> EventWait {
        self.sync.event.get()
    }

    pub(crate) fn set_event_wait(&self, ev: EventWait) {
        self.sync.event.set(ev);
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self, other)
    }
}
impl Eq for Task {}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("priority", &self.priority.get())
            .field("state", &self.state.get())
            .finish()
    }
}

/// The idle task body. Runs at the lowest priority whenever no other task
/// is ready; never blocks, yields or exits, per spec §3.
pub(crate) fn idle_main() -> TaskResult {
    loop {
        core::hint::spin_loop();
    }
}

/// The architecture-neutral task entry point. A [`Port::init_stack`]
/// implementation lays down an initial exception frame whose return
/// address is this function, with `task` passed in the frame's first
/// argument register; the first context restore then "returns" into here
/// instead of into the task's own subroutine directly, so the exit handler
/// still runs if the subroutine returns.
///
/// Never returns: spec §3 tasks don't terminate a kernel thread in the
/// POSIX sense. Once the subroutine returns, the (optional) exit handler
/// runs inside a critical section, the task is detached from every queue
/// via `remove_task`, and the scheduler is re-run to pick the next task —
/// only then does this fall through to spinning, which is otherwise
/// unreachable since `remove_task` always hands the CPU to some other
/// ready task (the idle task at worst).
pub fn task_entry<P: crate::port::Port>(task: &'static Task) -> ! {
    let result = (task.subroutine())();
    P::critical_start();
    if let Some(handler) = task.exit_handler() {
        handler(task, result);
    }
    P::kernel().tasks().remove_task(task);
    P::critical_end();
    crate::scheduler::schedule::<P>();
    loop {
        core::hint::spin_loop();
    }
}
