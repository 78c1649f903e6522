//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::collections::VecDeque;

/// A fixed size, keyed queue ordered from least to most recently touched.
///
/// Upserting a present key replaces its value and moves it to the back. Upserting a new key
/// into a full queue drops the front (least recently touched) entry first.
pub struct RecencyQueue<K, V> {
    limit: usize,
    values: VecDeque<(K, V)>,
}

impl<K: Eq, V> RecencyQueue<K, V> {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            values: VecDeque::with_capacity(limit),
        }
    }

    /// Iff upserting evicted an old entry, return it.
    pub fn upsert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(index) = self.position(&key) {
            self.values.remove(index);
            self.values.push_back((key, value));
            return None;
        }
        if self.limit == 0 {
            return Some((key, value));
        }
        let evicted = if self.is_full() {
            self.values.pop_front()
        } else {
            None
        };
        self.values.push_back((key, value));
        evicted
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.position(key).is_some()
    }

    /// Keeps only the entries for which `keep` returns true, preserving order.
    /// Returns how many entries were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let before = self.values.len();
        self.values.retain(|(key, value)| keep(key, value));
        before - self.values.len()
    }

    /// Least recently touched first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&K, &V)> + ExactSizeIterator + '_ {
        self.values.iter().map(|(key, value)| (key, value))
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> + ExactSizeIterator + '_ {
        self.values.iter().map(|(key, _)| key)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.limit
    }

    fn position(&self, key: &K) -> Option<usize> {
        self.values.iter().position(|(candidate, _)| candidate == key)
    }
}

#[cfg(test)]
mod tests {
    use super::RecencyQueue;

    fn keys(queue: &RecencyQueue<&'static str, u32>) -> Vec<&'static str> {
        queue.keys().copied().collect()
    }

    #[test]
    fn fill_to_limit() {
        let mut queue = RecencyQueue::new(3);
        assert!(queue.is_empty());
        assert_eq!(None, queue.upsert("a", 1));
        assert_eq!(None, queue.upsert("b", 2));
        assert!(!queue.is_full());
        assert_eq!(None, queue.upsert("c", 3));
        assert!(queue.is_full());
        assert_eq!(vec!["a", "b", "c"], keys(&queue));
    }

    #[test]
    fn overfill_drops_oldest() {
        let mut queue = RecencyQueue::new(2);
        queue.upsert("a", 1);
        queue.upsert("b", 2);
        assert_eq!(Some(("a", 1)), queue.upsert("c", 3));
        assert_eq!(Some(("b", 2)), queue.upsert("d", 4));
        assert_eq!(vec!["c", "d"], keys(&queue));
        assert_eq!(2, queue.len());
    }

    #[test]
    fn upsert_present_key_moves_to_back() {
        let mut queue = RecencyQueue::new(3);
        queue.upsert("a", 1);
        queue.upsert("b", 2);
        queue.upsert("c", 3);
        assert_eq!(None, queue.upsert("a", 10));
        assert_eq!(vec!["b", "c", "a"], keys(&queue));
        assert_eq!(Some((&"a", &10)), queue.iter().last());

        // "b" is now the oldest and the one to go.
        assert_eq!(Some(("b", 2)), queue.upsert("d", 4));
        assert_eq!(vec!["c", "a", "d"], keys(&queue));
    }

    #[test]
    fn retain_reports_dropped() {
        let mut queue = RecencyQueue::new(4);
        queue.upsert("a", 1);
        queue.upsert("b", 2);
        queue.upsert("c", 3);
        assert_eq!(2, queue.retain(|_, value| *value == 2));
        assert_eq!(vec!["b"], keys(&queue));
        assert_eq!(0, queue.retain(|_, _| true));
    }

    #[test]
    fn contains_and_clear() {
        let mut queue = RecencyQueue::new(4);
        queue.upsert("a", 1);
        queue.upsert("b", 2);
        assert!(queue.contains_key(&"a"));
        assert!(!queue.contains_key(&"c"));
        queue.clear();
        assert!(queue.is_empty());
        assert!(!queue.contains_key(&"a"));
    }

    #[test]
    fn zero_limit_keeps_nothing() {
        let mut queue = RecencyQueue::new(0);
        assert_eq!(Some(("a", 1)), queue.upsert("a", 1));
        assert!(queue.is_empty());
    }
}
