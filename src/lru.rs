//! A least-recently-used cache with a fixed capacity.
//!
//! Ported near-verbatim from the teacher's `keos-project5/src/lru.rs`: a
//! `BTreeMap` of nodes plus a manual intrusive doubly-linked list of keys for
//! O(1) touch/evict. It is already single-threaded (no internal locking),
//! which is exactly the concurrency model §5 asks every cache in this crate
//! to have, so no adaptation beyond `alloc` -> `std` collections was needed.
//! This is reused directly by the Tree Cache (§4.E), the Area Summary Cache
//! (§4.C) and the Page Address Cache (§4.G) as their eviction policy.

use std::collections::BTreeMap;

struct Node<K: Clone, V> {
    v: V,
    prev: Option<K>,
    next: Option<K>,
}

/// A least-recently-used cache holding at most `MAX_SIZE` entries.
pub struct LruCache<K: Ord + Clone, V, const MAX_SIZE: usize> {
    inner: BTreeMap<K, Node<K, V>>,
    head: Option<K>,
    tail: Option<K>,
}

impl<K: Ord + Clone, V, const MAX_SIZE: usize> Default for LruCache<K, V, MAX_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V, const MAX_SIZE: usize> LruCache<K, V, MAX_SIZE> {
    fn attach(&mut self, k: K) -> &mut Node<K, V> {
        if let Some(tail) = self.tail.take() {
            let last = self.inner.get_mut(&tail).unwrap();
            last.next = Some(k.clone());
        } else {
            self.head = Some(k.clone());
        }
        let ptail = self.tail.clone();
        self.tail = Some(k.clone());

        let node = self.inner.get_mut(&k).unwrap();
        node.prev = ptail;
        node
    }

    fn detach(&mut self, prev: Option<K>, next: Option<K>) {
        if let Some(next) = next.as_ref() {
            self.inner.get_mut(next).unwrap().prev = prev.clone();
        } else {
            self.tail = prev.clone();
        }

        if let Some(prev) = prev {
            self.inner.get_mut(&prev).unwrap().next = next;
        } else {
            self.head = next;
        }
    }

    /// Makes a new, empty cache. Does not allocate anything on its own.
    pub const fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
            head: None,
            tail: None,
        }
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns a mutable reference to the value for `k`, marking it most
    /// recently used.
    pub fn get(&mut self, k: K) -> Option<&mut V> {
        let node = self.inner.get_mut(&k)?;
        let (prev, next) = (node.prev.take(), node.next.take());
        self.detach(prev, next);
        Some(&mut self.attach(k).v)
    }

    /// Peeks at the value for `k` without disturbing recency order.
    pub fn peek(&self, k: &K) -> Option<&V> {
        self.inner.get(k).map(|n| &n.v)
    }

    /// Returns the value for `k`, inserting it via `f` (marking it most
    /// recently used either way) if absent.
    ///
    /// Returns the key evicted to make room, if any, alongside the value.
    pub fn get_or_insert_with<E>(
        &mut self,
        k: K,
        f: impl FnOnce() -> Result<V, E>,
    ) -> Result<&mut V, E> {
        Ok(if let Some(node) = self.inner.get_mut(&k) {
            let (prev, next) = (node.prev.take(), node.next.take());
            self.detach(prev, next);
            &mut self.attach(k).v
        } else {
            &mut self.put_evicting(k, f()?).0.v
        })
    }

    /// Finds the least-recently-used resident key for which `evictable`
    /// returns `true`, scanning from the LRU end forward.
    fn find_evictable(&self, evictable: &impl Fn(&V) -> bool) -> Option<K> {
        let mut cursor = self.head.clone();
        while let Some(key) = cursor {
            let node = self.inner.get(&key)?;
            if evictable(&node.v) {
                return Some(key);
            }
            cursor = node.next.clone();
        }
        None
    }

    /// Like [`get_or_insert_with`], but never evicts a resident entry for
    /// which `evictable` returns `false`. If the cache is already at
    /// `MAX_SIZE` and no resident entry is evictable, the new entry is
    /// inserted anyway rather than silently dropping one `evictable`
    /// refused to approve — capacity becomes a soft bound in that case, not
    /// a hard one. Returns the evicted entry, if any, alongside the value.
    pub fn get_or_insert_with_evicting<E>(
        &mut self,
        k: K,
        evictable: impl Fn(&V) -> bool,
        f: impl FnOnce() -> Result<V, E>,
    ) -> Result<(&mut V, Option<(K, V)>), E> {
        if self.inner.contains_key(&k) {
            let node = self.inner.get_mut(&k).unwrap();
            let (prev, next) = (node.prev.take(), node.next.take());
            self.detach(prev, next);
            return Ok((&mut self.attach(k).v, None));
        }
        let mut evicted = None;
        if MAX_SIZE <= self.inner.len() {
            if let Some(victim) = self.find_evictable(&evictable) {
                if let Some(v) = self.remove(&victim) {
                    evicted = Some((victim, v));
                }
            }
        }
        let v = f()?;
        let node = Node {
            v,
            prev: self.tail.clone(),
            next: None,
        };
        self.inner.insert(k.clone(), node);
        Ok((&mut self.attach(k).v, evicted))
    }

    fn put_evicting(&mut self, k: K, v: V) -> (&mut Node<K, V>, Option<(K, V)>) {
        let mut evicted = None;
        if let Some(node) = self.inner.get_mut(&k) {
            node.v = v;
            let (prev, next) = (node.prev.take(), node.next.take());
            self.detach(prev, next);
        } else {
            if MAX_SIZE <= self.inner.len() {
                let victim = self.head.clone().expect("non-empty cache has a head");
                if let Some(v) = self.remove(&victim) {
                    evicted = Some((victim, v));
                }
            }
            let node = Node {
                v,
                prev: self.tail.clone(),
                next: None,
            };
            self.inner.insert(k.clone(), node);
        }
        (self.attach(k), evicted)
    }

    /// Inserts a key-value pair, evicting the least recently used entry if
    /// the cache is at capacity. Returns the evicted entry, if any.
    pub fn put(&mut self, k: K, v: V) -> Option<(K, V)> {
        self.put_evicting(k, v).1
    }

    /// Removes `k`, returning its value if present.
    pub fn remove(&mut self, k: &K) -> Option<V> {
        let mut node = self.inner.remove(k)?;
        self.detach(node.prev.take(), node.next.take());
        Some(node.v)
    }

    /// Keeps only the entries for which `f` returns `true`.
    pub fn retain(&mut self, mut f: impl FnMut(&K, &mut V) -> bool) {
        let drop_keys: Vec<K> = self
            .inner
            .iter_mut()
            .filter_map(|(k, v)| (!f(k, &mut v.v)).then(|| k.clone()))
            .collect();
        for k in drop_keys {
            self.remove(&k);
        }
    }

    /// Iterates over every entry, in no particular order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.inner.iter_mut().map(|(k, v)| (k, &mut v.v))
    }

    /// The key at the head of the recency list, i.e. the next eviction
    /// candidate.
    pub fn lru_key(&self) -> Option<&K> {
        self.head.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache: LruCache<i32, &'static str, 2> = LruCache::new();
        cache.put(1, "one");
        cache.put(2, "two");
        assert_eq!(cache.get(1), Some(&mut "one"));
        let evicted = cache.put(3, "three");
        assert_eq!(evicted, Some((2, "two")));
        assert!(cache.peek(&2).is_none());
        assert!(cache.peek(&1).is_some());
        assert!(cache.peek(&3).is_some());
    }

    #[test]
    fn get_or_insert_with_only_calls_f_once() {
        let mut cache: LruCache<i32, i32, 4> = LruCache::new();
        let mut calls = 0;
        for _ in 0..3 {
            cache
                .get_or_insert_with(1, || -> Result<i32, ()> {
                    calls += 1;
                    Ok(42)
                })
                .unwrap();
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn get_or_insert_with_evicting_skips_non_evictable_entries() {
        let mut cache: LruCache<i32, bool, 2> = LruCache::new();
        cache.put(1, true);
        cache.put(2, true);
        let (_, evicted) = cache
            .get_or_insert_with_evicting(3, |pinned| !*pinned, || -> Result<bool, ()> { Ok(false) })
            .unwrap();
        assert!(evicted.is_none(), "no entry was evictable, so nothing should be dropped");
        assert_eq!(cache.len(), 3, "insert proceeds past MAX_SIZE rather than discarding a pinned entry");
        assert!(cache.peek(&1).is_some());
        assert!(cache.peek(&2).is_some());
    }

    #[test]
    fn get_or_insert_with_evicting_evicts_first_matching_lru_entry() {
        let mut cache: LruCache<i32, bool, 2> = LruCache::new();
        cache.put(1, true);
        cache.put(2, false);
        let (_, evicted) = cache
            .get_or_insert_with_evicting(3, |pinned| !*pinned, || -> Result<bool, ()> { Ok(false) })
            .unwrap();
        assert_eq!(evicted, Some((2, false)));
        assert!(cache.peek(&1).is_some());
        assert!(cache.peek(&3).is_some());
    }

    #[test]
    fn retain_drops_non_matching() {
        let mut cache: LruCache<i32, i32, 8> = LruCache::new();
        for i in 0..4 {
            cache.put(i, i * 10);
        }
        cache.retain(|k, _| k % 2 == 0);
        assert!(cache.peek(&0).is_some());
        assert!(cache.peek(&1).is_none());
        assert_eq!(cache.len(), 2);
    }
}
