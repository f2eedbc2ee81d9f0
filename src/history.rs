//! Fixed-capacity ring of recent records.
//!
//! Once `capacity` items have been pushed, each further push overwrites
//! the oldest retained item. Lifetime counters (`total_written`,
//! `overwritten_count`) survive overwrites for observability.

use std::collections::VecDeque;
use std::sync::Mutex;

struct RingState<T> {
    items: VecDeque<T>,
    total_written: u64,
}

/// Bounded history of the most recent records.
pub struct CircularHistoryBuffer<T> {
    state: Mutex<RingState<T>>,
    capacity: usize,
}

impl<T: Clone> CircularHistoryBuffer<T> {
    /// Create a buffer retaining at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(RingState {
                items: VecDeque::with_capacity(capacity),
                total_written: 0,
            }),
            capacity,
        }
    }

    /// Append an item, overwriting the oldest once full.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock().expect("history lock poisoned");
        if state.items.len() == self.capacity {
            state.items.pop_front();
        }
        state.items.push_back(item);
        state.total_written += 1;
    }

    /// Retained items, oldest to newest.
    pub fn get_all(&self) -> Vec<T> {
        let state = self.state.lock().expect("history lock poisoned");
        state.items.iter().cloned().collect()
    }

    /// The last `min(n, len)` items, oldest to newest within that slice.
    pub fn get_recent(&self, n: usize) -> Vec<T> {
        let state = self.state.lock().expect("history lock poisoned");
        let skip = state.items.len().saturating_sub(n);
        state.items.iter().skip(skip).cloned().collect()
    }

    /// Currently retained count (at most `capacity`).
    pub fn len(&self) -> usize {
        self.state.lock().expect("history lock poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lifetime count of pushes, including overwritten items.
    pub fn total_written(&self) -> u64 {
        self.state
            .lock()
            .expect("history lock poisoned")
            .total_written
    }

    /// How many items have been overwritten: `max(0, total_written − capacity)`.
    pub fn overwritten_count(&self) -> u64 {
        let state = self.state.lock().expect("history lock poisoned");
        state.total_written.saturating_sub(self.capacity as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retains_last_capacity_items_in_order() {
        let buffer = CircularHistoryBuffer::new(5);
        for i in 0..10 {
            buffer.push(i);
        }

        assert_eq!(buffer.get_all(), vec![5, 6, 7, 8, 9]);
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.total_written(), 10);
        assert_eq!(buffer.overwritten_count(), 5);
    }

    #[test]
    fn under_capacity_keeps_everything() {
        let buffer = CircularHistoryBuffer::new(5);
        buffer.push("a");
        buffer.push("b");

        assert_eq!(buffer.get_all(), vec!["a", "b"]);
        assert_eq!(buffer.total_written(), 2);
        assert_eq!(buffer.overwritten_count(), 0);
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let buffer = CircularHistoryBuffer::new(10);
        for i in 0..6 {
            buffer.push(i);
        }

        assert_eq!(buffer.get_recent(3), vec![3, 4, 5]);
        assert_eq!(buffer.get_recent(100), vec![0, 1, 2, 3, 4, 5]);
        assert!(buffer.get_recent(0).is_empty());
    }

    #[test]
    fn counters_consistent_when_full() {
        let buffer = CircularHistoryBuffer::new(3);
        for i in 0..7 {
            buffer.push(i);
        }

        // totalWritten − overwritten = retained size once full.
        assert_eq!(
            buffer.total_written() - buffer.overwritten_count(),
            buffer.len() as u64
        );
    }

    #[test]
    fn zero_capacity_clamped_to_one() {
        let buffer = CircularHistoryBuffer::new(0);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.get_all(), vec![2]);
    }

    #[test]
    fn concurrent_pushes_never_exceed_capacity() {
        use std::sync::Arc;
        let buffer = Arc::new(CircularHistoryBuffer::new(8));
        let mut handles = Vec::new();
        for t in 0..4 {
            let buffer = Arc::clone(&buffer);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    buffer.push(t * 100 + i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.total_written(), 400);
        assert_eq!(buffer.overwritten_count(), 392);
    }
}
