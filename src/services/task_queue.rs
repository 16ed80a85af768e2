//! Bounded priority queue for an arbiter's pending tasks.
//!
//! One FIFO band per priority level. Dequeue takes the head of the most
//! urgent non-empty band, so equal-priority tasks run in insertion order.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, TaskPriority};

const BANDS: usize = TaskPriority::ALL.len();

#[derive(Debug)]
pub struct TaskQueue {
    bands: [VecDeque<Task>; BANDS],
    capacity: usize,
    len: usize,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            bands: Default::default(),
            capacity,
            len: 0,
        }
    }

    /// Append to the back of the task's priority band.
    pub fn push_back(&mut self, task: Task) -> DomainResult<()> {
        self.ensure_room()?;
        self.bands[task.priority.band()].push_back(task);
        self.len += 1;
        Ok(())
    }

    /// Insert at the front of the task's priority band. Used for retries.
    pub fn push_front(&mut self, task: Task) -> DomainResult<()> {
        self.ensure_room()?;
        self.bands[task.priority.band()].push_front(task);
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Task> {
        let task = self.bands.iter_mut().find_map(VecDeque::pop_front)?;
        self.len -= 1;
        Some(task)
    }

    pub fn peek(&self) -> Option<&Task> {
        self.bands.iter().find_map(VecDeque::front)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.bands.iter().flatten().any(|t| t.id == id)
    }

    /// Queued task count per priority, most urgent first.
    pub fn band_sizes(&self) -> [usize; BANDS] {
        let mut sizes = [0; BANDS];
        for (size, band) in sizes.iter_mut().zip(&self.bands) {
            *size = band.len();
        }
        sizes
    }

    /// Remove every queued task.
    pub fn drain_all(&mut self) -> Vec<Task> {
        self.len = 0;
        self.bands.iter_mut().flat_map(std::mem::take).collect()
    }

    fn ensure_room(&self) -> DomainResult<()> {
        if self.len >= self.capacity {
            return Err(DomainError::QueueFull {
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(query: &str, priority: TaskPriority) -> Task {
        Task::new(query).with_priority(priority)
    }

    #[test]
    fn test_priority_then_fifo_order() {
        let mut queue = TaskQueue::new(10);
        queue.push_back(task("low-1", TaskPriority::Low)).unwrap();
        queue.push_back(task("normal-1", TaskPriority::Normal)).unwrap();
        queue.push_back(task("critical", TaskPriority::Critical)).unwrap();
        queue.push_back(task("normal-2", TaskPriority::Normal)).unwrap();
        queue.push_back(task("bg", TaskPriority::Background)).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| queue.pop()).map(|t| t.query).collect();
        assert_eq!(order, vec!["critical", "normal-1", "normal-2", "low-1", "bg"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_front_goes_to_head_of_band() {
        let mut queue = TaskQueue::new(10);
        queue.push_back(task("a", TaskPriority::Normal)).unwrap();
        queue.push_back(task("b", TaskPriority::Normal)).unwrap();
        queue.push_front(task("retry", TaskPriority::Normal)).unwrap();
        queue.push_back(task("urgent", TaskPriority::High)).unwrap();

        assert_eq!(queue.pop().unwrap().query, "urgent");
        assert_eq!(queue.pop().unwrap().query, "retry");
        assert_eq!(queue.pop().unwrap().query, "a");
    }

    #[test]
    fn test_capacity_rejects_and_leaves_queue_unchanged() {
        let mut queue = TaskQueue::new(2);
        queue.push_back(task("a", TaskPriority::Low)).unwrap();
        queue.push_back(task("b", TaskPriority::Low)).unwrap();

        let err = queue.push_back(task("c", TaskPriority::Critical)).unwrap_err();
        assert!(matches!(err, DomainError::QueueFull { capacity: 2 }));
        assert!(queue.push_front(task("d", TaskPriority::Low)).is_err());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peek().unwrap().query, "a");
    }

    #[test]
    fn test_band_sizes_and_drain() {
        let mut queue = TaskQueue::new(10);
        queue.push_back(task("a", TaskPriority::Critical)).unwrap();
        queue.push_back(task("b", TaskPriority::Background)).unwrap();
        queue.push_back(task("c", TaskPriority::Background)).unwrap();
        assert_eq!(queue.band_sizes(), [1, 0, 0, 0, 2]);

        let id = queue.peek().unwrap().id;
        assert!(queue.contains(id));
        assert_eq!(queue.drain_all().len(), 3);
        assert!(queue.is_empty());
    }
}
