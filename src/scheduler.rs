//! Deferred one-shot tasks keyed by due time.
//!
//! Time is whatever clock the caller ticks with (seconds). Nothing runs by
//! itself: the owner polls [`TaskQueue::pop_due`] from its tick.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(u64);

#[derive(Debug)]
struct Scheduled<T> {
    id: TaskId,
    due: f64,
    task: T,
}

#[derive(Debug)]
pub struct TaskQueue<T> {
    pending: Vec<Scheduled<T>>,
    next_id: u64,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, task: T, due: f64) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.pending.push(Scheduled { id, due, task });
        id
    }

    /// Removes a task before it fires. Returns it if it was still pending.
    pub fn cancel(&mut self, id: TaskId) -> Option<T> {
        let idx = self.pending.iter().position(|s| s.id == id)?;
        Some(self.pending.remove(idx).task)
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn is_pending(&self, id: TaskId) -> bool {
        self.pending.iter().any(|s| s.id == id)
    }

    /// Earliest task whose due time has passed. Ties fire in scheduling order.
    pub fn pop_due(&mut self, now: f64) -> Option<(TaskId, T)> {
        let idx = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, s)| s.due <= now)
            .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due).then(a.id.cmp(&b.id)))
            .map(|(idx, _)| idx)?;
        let scheduled = self.pending.remove(idx);
        Some((scheduled.id, scheduled.task))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_fire_once_their_time_has_come() {
        let mut queue = TaskQueue::new();
        queue.schedule("late", 2.0);
        queue.schedule("early", 1.0);

        assert!(queue.pop_due(0.5).is_none());
        assert_eq!(queue.pop_due(1.5).map(|(_, t)| t), Some("early"));
        assert!(queue.pop_due(1.5).is_none());
        assert_eq!(queue.pop_due(10.0).map(|(_, t)| t), Some("late"));
        assert!(queue.is_empty());
    }

    #[test]
    fn equal_due_times_keep_scheduling_order() {
        let mut queue = TaskQueue::new();
        queue.schedule(1, 1.0);
        queue.schedule(2, 1.0);
        queue.schedule(3, 0.5);
        let order: Vec<i32> = std::iter::from_fn(|| queue.pop_due(1.0).map(|(_, t)| t)).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn cancelled_tasks_never_fire() {
        let mut queue = TaskQueue::new();
        let keep = queue.schedule("keep", 1.0);
        let drop = queue.schedule("drop", 1.0);

        assert_eq!(queue.cancel(drop), Some("drop"));
        assert_eq!(queue.cancel(drop), None);
        assert!(!queue.is_pending(drop));
        assert!(queue.is_pending(keep));
        assert_eq!(queue.pop_due(5.0), Some((keep, "keep")));
    }

    #[test]
    fn cancel_all_empties_the_queue() {
        let mut queue = TaskQueue::new();
        queue.schedule((), 0.0);
        queue.schedule((), 3.0);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.cancel_all(), 2);
        assert!(queue.pop_due(f64::MAX).is_none());
    }
}
