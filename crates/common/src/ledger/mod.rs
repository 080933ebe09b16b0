//! Bounded, most-recent-first logs.
//!
//! Both logs keep their newest entry at index 0 and evict from the tail once
//! full. They are plain values; persisting them is the owner's job.

use std::collections::VecDeque;

mod activity;
mod connection;

pub use activity::{ActivityEntry, ActivityLog, ACTIVITY_LOG_CAPACITY, ACTIVITY_LOG_KEY};
pub use connection::{
    Channel, ConnectionKind, ConnectionLog, ConnectionLogEntry, CONNECTION_LOG_CAPACITY,
    CONNECTION_LOG_KEY,
};

/// Fixed-capacity deque with the newest entry at the front
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Rebuild from persisted entries, already ordered newest first
    pub fn from_entries(capacity: usize, entries: Vec<T>) -> Self {
        let mut log = Self::new(capacity);
        log.entries.extend(entries.into_iter().take(log.capacity));
        log
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push_front(&mut self, entry: T) {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    pub fn front_mut(&mut self) -> Option<&mut T> {
        self.entries.front_mut()
    }

    pub fn position(&self, pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.entries.iter().position(pred)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.entries.get_mut(idx)
    }

    /// Move the entry at `idx` to the front
    pub fn promote(&mut self, idx: usize) {
        if idx == 0 {
            return;
        }
        if let Some(entry) = self.entries.remove(idx) {
            self.entries.push_front(entry);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Owned copy, newest first
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut log = BoundedLog::new(3);
        for i in 0..5 {
            log.push_front(i);
        }
        assert_eq!(log.to_vec(), vec![4, 3, 2]);
    }

    #[test]
    fn test_promote() {
        let mut log = BoundedLog::from_entries(4, vec![1, 2, 3]);
        log.promote(2);
        assert_eq!(log.to_vec(), vec![3, 1, 2]);
        log.promote(0);
        assert_eq!(log.to_vec(), vec![3, 1, 2]);
    }

    #[test]
    fn test_restore_truncates() {
        let log = BoundedLog::from_entries(2, vec![1, 2, 3]);
        assert_eq!(log.to_vec(), vec![1, 2]);
    }
}
