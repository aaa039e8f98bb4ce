//! The intrusive, priority-ordered doubly-linked task queue (spec §4.1).
//!
//! Membership is tracked on the node itself (`Task::queue`), so `remove`
//! is O(1) and doesn't need to search the queue it's being removed from.
//! No allocation: nodes are borrowed `&'static Task` references into
//! caller-owned storage.

use core::cell::Cell;

use crate::task::Task;

/// A FIFO or priority-ordered queue of tasks.
pub struct TaskQueue {
    head: Cell<Option<&'static Task>>,
    tail: Cell<Option<&'static Task>>,
    len: Cell<usize>,
}

// SAFETY: every mutation goes through `&'static self` methods that callers
// only invoke from within a critical section (enforced by `Port`).
unsafe impl Sync for TaskQueue {}

impl TaskQueue {
    pub const fn new() -> Self {
        Self {
            head: Cell::new(None),
            tail: Cell::new(None),
            len: Cell::new(0),
        }
    }

    pub fn head(&self) -> Option<&'static Task> {
        self.head.get()
    }

    pub fn len(&self) -> usize {
        self.len.get()
    }

    pub fn is_empty(&self) -> bool {
        self.len.get() == 0
    }

    fn link(&'static self, node: &'static Task, prev: Option<&'static Task>, next: Option<&'static Task>) {
        node.link.prev.set(prev);
        node.link.next.set(next);
        match prev {
            Some(p) => p.link.next.set(Some(node)),
            None => self.head.set(Some(node)),
        }
        match next {
            Some(n) => n.link.prev.set(Some(node)),
            None => self.tail.set(Some(node)),
        }
        node.link.queue.set(Some(self));
        self.len.set(self.len.get() + 1);
    }

    /// Inserts `node` immediately after `target`, or at the tail if
    /// `target` is `None`.
    pub fn insert_after(&'static self, node: &'static Task, target: Option<&'static Task>) {
        let (prev, next) = match target {
            None => (self.tail.get(), None),
            Some(t) => (Some(t), t.link.next.get()),
        };
        self.link(node, prev, next);
    }

    /// Inserts `node` immediately before `target`, or at the head if
    /// `target` is `None`.
    pub fn insert_before(&'static self, node: &'static Task, target: Option<&'static Task>) {
        let (prev, next) = match target {
            None => (None, self.head.get()),
            Some(t) => (t.link.prev.get(), Some(t)),
        };
        self.link(node, prev, next);
    }

    /// Inserts `node` in priority order: scanning from the tail, after the
    /// first existing entry whose priority is the same or higher (lower
    /// numeric value) than `node`'s. Ties are broken FIFO, since the new
    /// node lands after every existing entry at the same priority.
    pub fn insert_sorted(&'static self, node: &'static Task) {
        let mut cur = self.tail.get();
        while let Some(c) = cur {
            if c.priority.get() <= node.priority.get() {
                self.insert_after(node, Some(c));
                return;
            }
            cur = c.link.prev.get();
        }
        self.insert_before(node, None);
    }

    pub fn push_back(&'static self, node: &'static Task) {
        self.insert_after(node, None);
    }

    /// Detaches and returns the head, or `None` if the queue is empty.
    pub fn pop(&'static self) -> Option<&'static Task> {
        let head = self.head.get()?;
        self.remove(head);
        Some(head)
    }

    /// Detaches `node` if it currently belongs to this queue. Returns
    /// `false` (a no-op) if `node` belongs to a different queue or none.
    pub fn remove(&'static self, node: &'static Task) -> bool {
        match node.link.queue.get() {
            Some(q) if core::ptr::eq(q, self) => {}
            _ => return false,
        }
        let prev = node.link.prev.get();
        let next = node.link.next.get();
        match prev {
            Some(p) => p.link.next.set(next),
            None => self.head.set(next),
        }
        match next {
            Some(n) => n.link.prev.set(prev),
            None => self.tail.set(prev),
        }
        node.link.prev.set(None);
        node.link.next.set(None);
        node.link.queue.set(None);
        self.len.set(self.len.get() - 1);
        true
    }

    /// Moves the head to the tail (round-robin rotation within a priority
    /// level). A no-op on queues of fewer than two entries.
    pub fn head_to_tail(&'static self) {
        if self.len.get() < 2 {
            return;
        }
        if let Some(h) = self.head.get() {
            self.remove(h);
            self.insert_after(h, None);
        }
    }
}
