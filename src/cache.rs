// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Fixed-capacity FIFO caches shared between a writer loop and concurrent readers.
//!
//! Items live in a ring of pre-allocated slots. Insertion past capacity overwrites
//! the oldest slot, so eviction is strictly by insertion order. Readers always get
//! an owned snapshot taken under the read lock and never see a half-applied write.

use parking_lot::RwLock;

struct Ring<T> {
    slots: Vec<Option<T>>,
    /// Index of the oldest item.
    head: usize,
    len: usize,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn index(&self, offset: usize) -> usize {
        (self.head + offset) % self.capacity()
    }

    fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Remove the item `offset` places after the oldest, closing the gap.
    fn remove(&mut self, offset: usize) -> Option<T> {
        if offset >= self.len {
            return None;
        }
        let idx = self.index(offset);
        let removed = self.slots[idx].take();
        for at in offset..self.len - 1 {
            let (to, from) = (self.index(at), self.index(at + 1));
            self.slots[to] = self.slots[from].take();
        }
        self.len -= 1;
        removed
    }

    fn push(&mut self, item: T) -> Option<T> {
        if self.is_full() {
            let evicted = self.slots[self.head].replace(item);
            self.head = (self.head + 1) % self.capacity();
            evicted
        } else {
            let idx = self.index(self.len);
            self.slots[idx] = Some(item);
            self.len += 1;
            None
        }
    }

    /// Oldest to newest.
    fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |offset| self.slots[self.index(offset)].as_ref())
    }

    fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len);
        for offset in 0..self.len {
            let idx = self.index(offset);
            if let Some(item) = self.slots[idx].take() {
                items.push(item);
            }
        }
        self.head = 0;
        self.len = 0;
        items
    }
}

/// Bounded FIFO cache with snapshot reads.
pub struct BoundedCache<T> {
    ring: RwLock<Ring<T>>,
}

impl<T> BoundedCache<T> {
    /// Create a cache holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(Ring::with_capacity(capacity.max(1))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.read().capacity()
    }

    pub fn len(&self) -> usize {
        self.ring.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an item, returning the evicted oldest item if the cache was full.
    pub fn push(&self, item: T) -> Option<T> {
        self.ring.write().push(item)
    }

    /// Append an item unless an existing entry matches `is_same`.
    ///
    /// The check and the insert happen under one write lock. Returns `true` if
    /// the item was inserted.
    pub fn push_unique(&self, item: T, is_same: impl Fn(&T) -> bool) -> bool {
        let mut ring = self.ring.write();
        if ring.iter().any(|existing| is_same(existing)) {
            return false;
        }
        ring.push(item);
        true
    }

    /// Append an item. When full, the oldest entry accepted by `may_evict` makes
    /// room; if none is accepted the oldest entry goes regardless.
    pub fn push_evicting(&self, item: T, may_evict: impl Fn(&T) -> bool) -> Option<T> {
        let mut ring = self.ring.write();
        if !ring.is_full() {
            return ring.push(item);
        }
        let victim = ring.iter().position(|existing| may_evict(existing));
        match victim {
            Some(offset) => {
                let evicted = ring.remove(offset);
                ring.push(item);
                evicted
            }
            None => ring.push(item),
        }
    }

    /// Returns true if any cached item matches.
    pub fn any(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.ring.read().iter().any(|item| pred(item))
    }

    /// Apply `f` to the newest item matching `pred`.
    pub fn update<R>(&self, pred: impl Fn(&T) -> bool, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut ring = self.ring.write();
        let len = ring.len;
        for offset in (0..len).rev() {
            let idx = ring.index(offset);
            if let Some(item) = ring.slots[idx].as_mut() {
                if pred(item) {
                    return Some(f(item));
                }
            }
        }
        None
    }

    /// Apply `f` to every item matching `pred`. Returns how many matched.
    pub fn update_all(&self, pred: impl Fn(&T) -> bool, mut f: impl FnMut(&mut T)) -> usize {
        let mut ring = self.ring.write();
        let mut touched = 0;
        for offset in 0..ring.len {
            let idx = ring.index(offset);
            if let Some(item) = ring.slots[idx].as_mut() {
                if pred(item) {
                    f(item);
                    touched += 1;
                }
            }
        }
        touched
    }

    /// Keep only items matching `keep`, preserving their relative order.
    pub fn retain(&self, keep: impl Fn(&T) -> bool) -> usize {
        let mut ring = self.ring.write();
        let before = ring.len;
        let items = ring.drain();
        for item in items.into_iter().filter(|item| keep(item)) {
            ring.push(item);
        }
        before - ring.len
    }

    pub fn clear(&self) {
        self.ring.write().drain();
    }
}

impl<T: Clone> BoundedCache<T> {
    /// All items, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.ring.read().iter().cloned().collect()
    }

    /// The newest `limit` items, returned oldest first (newest last).
    pub fn recent(&self, limit: usize) -> Vec<T> {
        let ring = self.ring.read();
        let skip = ring.len.saturating_sub(limit);
        ring.iter().skip(skip).cloned().collect()
    }

    /// Newest item matching `pred`.
    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        self.ring.read().iter().rev().find(|item| pred(item)).cloned()
    }
}
