//! Pending queue: one FIFO band per priority.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::task::{Priority, Task};

#[derive(Debug, Default)]
pub struct PendingQueue {
    bands: [VecDeque<Task>; Priority::ALL.len()],
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail of the task's priority band.
    pub fn push_back(&mut self, task: Task) {
        self.bands[task.priority.rank()].push_back(task);
    }

    /// Remove the highest-priority, earliest-queued task.
    pub fn pop_next(&mut self) -> Option<Task> {
        self.bands.iter_mut().find_map(VecDeque::pop_front)
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Task> {
        self.bands.iter_mut().find_map(|band| {
            let index = band.iter().position(|t| t.id == id)?;
            band.remove(index)
        })
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.iter().all(VecDeque::is_empty)
    }

    /// Tasks in admission order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.bands.iter().flatten()
    }

    /// Remove every task, in admission order.
    pub fn drain(&mut self) -> Vec<Task> {
        self.bands.iter_mut().flat_map(|band| band.drain(..)).collect()
    }
}
