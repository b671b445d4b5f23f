use std::sync::{Mutex, MutexGuard, PoisonError};

/// Ordered in-memory buffer drained by swapping in an empty vector.
///
/// `take` replaces the contents under the lock, so anything pushed while a
/// flush is in flight lands in the fresh vector and is never part of two
/// batches at once.
#[derive(Debug)]
pub struct EventQueue<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Appends an item and returns the new queue length.
    pub fn push(&self, item: T) -> usize {
        let mut items = self.lock();
        items.push(item);
        items.len()
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.lock())
    }

    /// Puts a failed batch's retained items back ahead of anything queued
    /// since the batch was taken.
    pub fn requeue_front(&self, retained: Vec<T>) {
        if retained.is_empty() {
            return;
        }
        let mut items = self.lock();
        let newer = std::mem::replace(&mut *items, retained);
        items.extend(newer);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave the Vec half-updated, so
    // a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_swaps_in_an_empty_queue() {
        let queue = EventQueue::new();
        assert_eq!(queue.push(1), 1);
        assert_eq!(queue.push(2), 2);

        let batch = queue.take();
        assert_eq!(batch, vec![1, 2]);
        assert!(queue.is_empty());

        queue.push(3);
        assert_eq!(queue.take(), vec![3]);
    }

    #[test]
    fn requeued_items_go_ahead_of_newer_arrivals() {
        let queue = EventQueue::new();
        queue.push("a");
        queue.push("b");
        let batch = queue.take();

        queue.push("c");
        queue.requeue_front(batch);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.take(), vec!["a", "b", "c"]);
    }

    #[test]
    fn requeue_of_nothing_leaves_queue_untouched() {
        let queue = EventQueue::new();
        queue.push(7);
        queue.requeue_front(Vec::new());
        assert_eq!(queue.take(), vec![7]);
    }
}
