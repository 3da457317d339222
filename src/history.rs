// Bounded undo/redo history

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entries kept before the oldest is evicted.
pub const HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry<T> {
    pub state: T,
    pub timestamp: DateTime<Utc>,
}

/// Fixed-capacity history with a cursor.
///
/// `push` discards every entry after the cursor before appending, so a new
/// state after an undo drops the redo branch. Past capacity the oldest entry
/// is evicted regardless of how often it was visited.
#[derive(Debug, Clone)]
pub struct HistoryManager<T> {
    entries: VecDeque<HistoryEntry<T>>,
    /// Index of the current entry; meaningless while `entries` is empty.
    cursor: usize,
    capacity: usize,
}

impl<T> Default for HistoryManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HistoryManager<T> {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            cursor: 0,
            capacity,
        }
    }

    pub fn push(&mut self, state: T) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.cursor + 1);
        }
        self.entries.push_back(HistoryEntry {
            state,
            timestamp: Utc::now(),
        });
        if self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.cursor = self.entries.len() - 1;
    }

    /// Step back one entry. `None` at the oldest entry, cursor unchanged.
    pub fn undo(&mut self) -> Option<&T> {
        if self.entries.is_empty() || self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.current()
    }

    /// Step forward one entry. `None` at the newest entry.
    pub fn redo(&mut self) -> Option<&T> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        self.current()
    }

    pub fn current(&self) -> Option<&T> {
        self.current_entry().map(|entry| &entry.state)
    }

    pub fn current_entry(&self) -> Option<&HistoryEntry<T>> {
        self.entries.get(self.cursor)
    }

    pub fn can_undo(&self) -> bool {
        !self.entries.is_empty() && self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry<T>> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_history() {
        let mut history: HistoryManager<String> = HistoryManager::new();
        assert!(history.current().is_none());
        assert!(history.undo().is_none());
        assert!(history.redo().is_none());
        assert_eq!(history.capacity(), HISTORY_CAPACITY);
    }

    #[test]
    fn test_entry_serializes_with_timestamp() {
        let mut history = HistoryManager::new();
        history.push("x = 1".to_string());
        let entry = history.current_entry().unwrap().clone();

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["state"], "x = 1");
        assert!(json["timestamp"].is_string());
        let back: HistoryEntry<String> = serde_json::from_value(json).unwrap();
        assert_eq!(back.timestamp, entry.timestamp);
    }

    #[test]
    fn test_undo_redo() {
        let mut history = HistoryManager::new();
        history.push("a");
        history.push("b");
        history.push("c");

        assert_eq!(history.undo(), Some(&"b"));
        assert_eq!(history.undo(), Some(&"a"));
        assert_eq!(history.undo(), None);
        assert_eq!(history.current(), Some(&"a"));

        assert_eq!(history.redo(), Some(&"b"));
        assert_eq!(history.redo(), Some(&"c"));
        assert_eq!(history.redo(), None);
        assert_eq!(history.current(), Some(&"c"));
    }

    #[test]
    fn test_push_after_undo_discards_redo() {
        let mut history = HistoryManager::new();
        history.push(1);
        history.push(2);
        history.undo();
        history.push(3);

        assert_eq!(history.current(), Some(&3));
        assert!(history.redo().is_none());
        assert_eq!(history.undo(), Some(&1));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_eviction_past_capacity() {
        let mut history = HistoryManager::new();
        for i in 0..=HISTORY_CAPACITY {
            history.push(i);
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.current(), Some(&HISTORY_CAPACITY));

        let mut oldest = HISTORY_CAPACITY;
        while let Some(state) = history.undo() {
            oldest = *state;
        }
        assert_eq!(oldest, 1);
    }

    #[test]
    fn test_timestamps_are_ordered() {
        let mut history = HistoryManager::with_capacity(3);
        history.push('x');
        history.push('y');
        let stamps: Vec<_> = history.entries().map(|e| e.timestamp).collect();
        assert!(stamps[0] <= stamps[1]);
    }

    proptest! {
        #[test]
        fn prop_current_is_last_push(states in proptest::collection::vec(any::<u16>(), 1..120)) {
            let mut history = HistoryManager::new();
            for state in &states {
                history.push(*state);
            }
            prop_assert_eq!(history.current(), states.last());
            prop_assert_eq!(history.len(), states.len().min(HISTORY_CAPACITY));

            let mut undone = 0;
            while history.undo().is_some() {
                undone += 1;
            }
            prop_assert_eq!(undone, states.len().min(HISTORY_CAPACITY) - 1);
            let first_kept = states.len().saturating_sub(HISTORY_CAPACITY);
            prop_assert_eq!(history.current(), Some(&states[first_kept]));
        }
    }
}
