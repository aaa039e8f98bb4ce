//! Per-priority ready/yielded/suspended queues and the ready bitmap
//! (spec §4.2).

use core::cell::Cell;

use crate::list::TaskQueue;
use crate::task::{Task, TaskState, IDLE_PRIORITY, NUM_PRIORITIES};

struct PriorityLevel {
    ready: TaskQueue,
    yielded: TaskQueue,
    suspended: TaskQueue,
}

impl PriorityLevel {
    const fn new() -> Self {
        Self {
            ready: TaskQueue::new(),
            yielded: TaskQueue::new(),
            suspended: TaskQueue::new(),
        }
    }
}

/// Owns every task queue in the kernel and the 32-bit ready bitmap that
/// indexes the 32 user priority levels (`0..IDLE_PRIORITY`). The idle
/// level sits outside the bitmap: it is always populated once the kernel
/// has started, so a `find_set` miss (bitmap all zero) unambiguously
/// means "run idle".
pub(crate) struct TaskControl {
    table: [PriorityLevel; NUM_PRIORITIES],
    ready_mask: Cell<u32>,
    running_priority: Cell<u8>,
}

// SAFETY: see `Task`'s safety note; the same single-core, critical-section
// discipline applies here.
unsafe impl Sync for TaskControl {}

impl TaskControl {
    pub const fn new() -> Self {
        Self {
            table: [const { PriorityLevel::new() }; NUM_PRIORITIES],
            ready_mask: Cell::new(0),
            running_priority: Cell::new(IDLE_PRIORITY),
        }
    }

    fn bit_for(priority: u8) -> u32 {
        debug_assert!(priority < IDLE_PRIORITY);
        1u32 << (31 - priority as u32)
    }

    fn set_bit(&self, priority: u8) {
        if priority != IDLE_PRIORITY {
            self.ready_mask.set(self.ready_mask.get() | Self::bit_for(priority));
        }
    }

    fn clear_bit(&self, priority: u8) {
        if priority != IDLE_PRIORITY {
            self.ready_mask.set(self.ready_mask.get() & !Self::bit_for(priority));
        }
    }

    pub fn ready_mask(&self) -> u32 {
        self.ready_mask.get()
    }

    pub fn running_priority(&self) -> u8 {
        self.running_priority.get()
    }

    /// Detaches `t` from whatever queue it currently occupies, clearing
    /// the ready bit for its priority level if that emptied a ready
    /// queue. Locates the queue via the task's own back-reference, so it
    /// works uniformly for ready, yielded, suspended, and (via
    /// `sync::SyncObject`) pending queues.
    pub(crate) fn detach(&'static self, t: &'static Task) {
        if let Some(q) = t.link.queue.get() {
            let p = t.priority.get() as usize;
            let was_ready = p < NUM_PRIORITIES && core::ptr::eq(q, &self.table[p].ready as *const TaskQueue);
            q.remove(t);
            if was_ready && q.is_empty() {
                self.clear_bit(p as u8);
            }
        }
    }

    pub fn ready_task(&'static self, t: &'static Task) {
        self.detach(t);
        t.timeout.set(0);
        t.state.set(TaskState::Ready);
        let p = t.priority.get() as usize;
        self.table[p].ready.push_back(t);
        self.set_bit(t.priority.get());
        log::trace!("task '{}' -> ready (priority {})", t.name(), t.priority.get());
    }

    pub fn yield_task(&'static self, t: &'static Task, ticks: u32) {
        self.detach(t);
        t.state.set(TaskState::Yielded);
        t.timeout.set(ticks);
        let p = t.priority.get() as usize;
        self.table[p].yielded.push_back(t);
        log::trace!("task '{}' -> yielded for {} ticks", t.name(), ticks);
    }

    pub fn suspend_task(&'static self, t: &'static Task) {
        self.detach(t);
        t.state.set(TaskState::Suspended);
        let p = t.priority.get() as usize;
        self.table[p].suspended.push_back(t);
        log::trace!("task '{}' -> suspended", t.name());
    }

    pub fn remove_task(&'static self, t: &'static Task) {
        self.detach(t);
        log::trace!("task '{}' removed", t.name());
    }

    /// Detaches and returns the head of the ready queue at the current
    /// running priority (the running task itself), clearing the ready
    /// bit if that was the only entry at that level.
    pub fn pop_running(&'static self) -> Option<&'static Task> {
        let p = self.running_priority.get() as usize;
        let task = self.table[p].ready.pop()?;
        if self.table[p].ready.is_empty() {
            self.clear_bit(p as u8);
        }
        Some(task)
    }

    /// Round-robins the ready queue at the current running priority.
    pub fn cycle_active(&'static self) {
        let p = self.running_priority.get() as usize;
        self.table[p].ready.head_to_tail();
    }

    /// Scans the ready bitmap and updates `running_priority`; returns the
    /// head of the ready queue at that level, which becomes the task to
    /// switch to. Always `Some` once the idle task has been readied.
    pub fn set_next_running(&'static self) -> Option<&'static Task> {
        let p = self.ready_mask.get().leading_zeros().min(IDLE_PRIORITY as u32) as u8;
        self.running_priority.set(p);
        self.table[p as usize].ready.head()
    }

    /// Decrements the remaining-tick count of every yielded task by one,
    /// promoting any that reach zero back to ready.
    pub fn update_delayed(&'static self) {
        for lvl in self.table.iter() {
            let mut cur = lvl.yielded.head();
            while let Some(t) = cur {
                let next = t.link.next.get();
                let remaining = t.timeout.get();
                if remaining > 0 {
                    let remaining = remaining - 1;
                    t.timeout.set(remaining);
                    if remaining == 0 {
                        self.ready_task(t);
                    }
                }
                cur = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskConfig, TaskStack};
    use quickcheck_macros::quickcheck;

    fn body() -> crate::TaskResult {
        Ok(())
    }

    fn leak_task(priority: u8, stack: &'static TaskStack<32>) -> &'static Task {
        Box::leak(Box::new(Task::create(TaskConfig {
            name: "t",
            stack: stack.region(),
            subroutine: body,
            exit_handler: None,
            priority,
        })))
    }

    #[test]
    fn idle_level_never_touches_the_bitmap() {
        static STACK: TaskStack<32> = TaskStack::new();
        static TC: TaskControl = TaskControl::new();
        let idle = leak_task(IDLE_PRIORITY, &STACK);

        TC.ready_task(idle);
        assert_eq!(TC.ready_mask(), 0);
        assert_eq!(TC.set_next_running().unwrap().priority(), IDLE_PRIORITY);
    }

    #[test]
    fn highest_priority_ready_task_wins() {
        static S0: TaskStack<32> = TaskStack::new();
        static S1: TaskStack<32> = TaskStack::new();
        static S2: TaskStack<32> = TaskStack::new();
        static TC: TaskControl = TaskControl::new();
        let idle = leak_task(IDLE_PRIORITY, &S0);
        let low = leak_task(20, &S1);
        let high = leak_task(3, &S2);

        TC.ready_task(idle);
        TC.ready_task(low);
        TC.ready_task(high);

        let next = TC.set_next_running().unwrap();
        assert_eq!(next.priority(), 3);
        assert_eq!(TC.running_priority(), 3);
    }

    #[test]
    fn emptying_a_ready_level_clears_its_bit() {
        static S0: TaskStack<32> = TaskStack::new();
        static TC: TaskControl = TaskControl::new();
        let t = leak_task(7, &S0);
        TC.ready_task(t);
        assert_ne!(TC.ready_mask(), 0);

        TC.running_priority.set(7);
        assert!(TC.pop_running().is_some());
        assert_eq!(TC.ready_mask(), 0);
    }

    #[test]
    fn update_delayed_promotes_expired_tasks_back_to_ready() {
        static S0: TaskStack<32> = TaskStack::new();
        static TC: TaskControl = TaskControl::new();
        let t = leak_task(9, &S0);
        TC.yield_task(t, 2);
        assert_eq!(TC.ready_mask(), 0);

        TC.update_delayed();
        assert_eq!(t.state(), TaskState::Yielded);

        TC.update_delayed();
        assert_eq!(t.state(), TaskState::Ready);
        assert_ne!(TC.ready_mask(), 0);
    }

    /// For any sequence of ready/pop operations at distinct priorities,
    /// the winner picked by `set_next_running` must always be the
    /// numerically smallest priority among currently-ready tasks.
    #[quickcheck]
    fn winner_is_always_minimum_ready_priority(priorities: Vec<u8>) -> bool {
        static STACKS: [TaskStack<32>; 16] = [
            TaskStack::new(), TaskStack::new(), TaskStack::new(), TaskStack::new(),
            TaskStack::new(), TaskStack::new(), TaskStack::new(), TaskStack::new(),
            TaskStack::new(), TaskStack::new(), TaskStack::new(), TaskStack::new(),
            TaskStack::new(), TaskStack::new(), TaskStack::new(), TaskStack::new(),
        ];
        static TC: TaskControl = TaskControl::new();

        let mut expected_min: Option<u8> = None;
        for (i, raw) in priorities.into_iter().take(16).enumerate() {
            let p = raw % IDLE_PRIORITY;
            let t = leak_task(p, &STACKS[i]);
            TC.ready_task(t);
            expected_min = Some(expected_min.map_or(p, |m| m.min(p)));
        }
        match (TC.set_next_running(), expected_min) {
            (Some(next), Some(min)) => next.priority() == min,
            (None, None) => true,
            _ => false,
        }
    }
}
