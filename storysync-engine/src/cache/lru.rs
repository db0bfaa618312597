//! Access-ordered key index shared by the cache backends.
//!
//! Recency is a monotonically increasing tick per key; the `order` map keeps
//! ticks sorted so the least-recently-used key is always the first entry.

use std::collections::{BTreeMap, HashMap};

#[derive(Debug)]
struct Slot<E> {
    value: E,
    tick: u64,
}

#[derive(Debug)]
pub(crate) struct LruIndex<E> {
    entries: HashMap<String, Slot<E>>,
    order: BTreeMap<u64, String>,
    next_tick: u64,
}

impl<E> Default for LruIndex<E> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
        }
    }
}

impl<E> LruIndex<E> {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Borrow without changing recency.
    pub(crate) fn peek_mut(&mut self, key: &str) -> Option<&mut E> {
        self.entries.get_mut(key).map(|slot| &mut slot.value)
    }

    /// Mark `key` as most recently used.
    pub(crate) fn touch(&mut self, key: &str) -> bool {
        let tick = self.bump();
        let Some(slot) = self.entries.get_mut(key) else {
            return false;
        };
        self.order.remove(&slot.tick);
        slot.tick = tick;
        self.order.insert(tick, key.to_owned());
        true
    }

    /// Insert or replace; the key becomes most recently used.
    pub(crate) fn insert(&mut self, key: String, value: E) -> Option<E> {
        let tick = self.bump();
        self.order.insert(tick, key.clone());
        let previous = self.entries.insert(key, Slot { value, tick })?;
        self.order.remove(&previous.tick);
        Some(previous.value)
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<E> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot.value)
    }

    /// Remove and return the least-recently-used entry.
    pub(crate) fn pop_lru(&mut self) -> Option<(String, E)> {
        let (_, key) = self.order.pop_first()?;
        let slot = self.entries.remove(&key)?;
        Some((key, slot.value))
    }

    /// Remove every entry matching `predicate`, returning them.
    pub(crate) fn drain_where(&mut self, mut predicate: impl FnMut(&E) -> bool) -> Vec<(String, E)> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, slot)| predicate(&slot.value))
            .map(|(key, _)| key.clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| self.remove(&key).map(|value| (key, value)))
            .collect()
    }

    pub(crate) fn drain_all(&mut self) -> Vec<(String, E)> {
        self.order.clear();
        self.entries
            .drain()
            .map(|(key, slot)| (key, slot.value))
            .collect()
    }

    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_lru_follows_access_order() {
        let mut index = LruIndex::default();
        index.insert("a".to_string(), 1);
        index.insert("b".to_string(), 2);
        index.insert("c".to_string(), 3);
        index.touch("a");

        assert_eq!(index.pop_lru(), Some(("b".to_string(), 2)));
        assert_eq!(index.pop_lru(), Some(("c".to_string(), 3)));
        assert_eq!(index.pop_lru(), Some(("a".to_string(), 1)));
        assert_eq!(index.pop_lru(), None);
    }

    #[test]
    fn reinsert_refreshes_recency_without_duplicate_order_entries() {
        let mut index = LruIndex::default();
        index.insert("a".to_string(), 1);
        index.insert("b".to_string(), 2);
        assert_eq!(index.insert("a".to_string(), 10), Some(1));

        assert_eq!(index.len(), 2);
        assert_eq!(index.pop_lru(), Some(("b".to_string(), 2)));
        assert_eq!(index.pop_lru(), Some(("a".to_string(), 10)));
        assert_eq!(index.pop_lru(), None);
    }

    #[test]
    fn drain_where_removes_only_matches() {
        let mut index = LruIndex::default();
        for (key, value) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            index.insert(key.to_string(), value);
        }
        let mut drained = index.drain_where(|v| v % 2 == 0);
        drained.sort();
        assert_eq!(drained, vec![("b".to_string(), 2), ("d".to_string(), 4)]);
        assert!(index.contains_key("a") && index.contains_key("c"));
        assert_eq!(index.pop_lru(), Some(("a".to_string(), 1)));
    }

    #[test]
    fn touch_missing_key_is_noop() {
        let mut index: LruIndex<u8> = LruIndex::default();
        assert!(!index.touch("ghost"));
        assert_eq!(index.len(), 0);
    }
}
