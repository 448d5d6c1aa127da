//! # Hash Chains over a Slot Arena
//!
//! Both shadow tables are "array of buckets, each a singly linked chain".
//! Instead of heap nodes with raw `next` pointers, all nodes of a table live
//! in one pre-reserved arena and link to each other by [`SlotId`]. Freed slots
//! go onto an intrusive free list and are recycled by the next push.
//!
//! ```text
//! heads:  [ 0 ]──► slot 3 ──► slot 0 ──► ∅
//!         [ 1 ]──► ∅
//!         [ 2 ]──► slot 1 ──► ∅
//!
//! free:   slot 2 ──► slot 4 ──► ∅
//! ```
//!
//! A push is the only operation that can run out of space, and it reports
//! that immediately with [`ChainFull`]. Nothing here reallocates after
//! construction, so every operation is safe to run under a spin lock.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::mem;

/// Index of a node inside the arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct SlotId(u32);

impl SlotId {
    #[inline]
    const fn index(self) -> usize {
        self.0 as usize
    }
}

enum Node<T> {
    Occupied { value: T, next: Option<SlotId> },
    Vacant { next_free: Option<SlotId> },
}

/// Returned by [`BucketChains::push_front`] when every slot is in use.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct ChainFull;

pub(crate) struct BucketChains<T> {
    heads: Box<[Option<SlotId>]>,
    nodes: Vec<Node<T>>,
    capacity: usize,
    free_head: Option<SlotId>,
    len: usize,
}

impl<T> BucketChains<T> {
    /// Reserves `buckets` chain heads and `capacity` node slots.
    ///
    /// `buckets` must be a power of two and `capacity` must fit a `u32`;
    /// [`TableConfig::validate`](crate::config::TableConfig::validate)
    /// checks both before any table is built.
    pub(crate) fn new(buckets: usize, capacity: usize) -> Self {
        debug_assert!(buckets.is_power_of_two());
        debug_assert!(u32::try_from(capacity).is_ok());
        Self {
            heads: alloc::vec![None; buckets].into_boxed_slice(),
            nodes: Vec::with_capacity(capacity),
            capacity,
            free_head: None,
            len: 0,
        }
    }

    #[inline]
    pub(crate) fn bucket_count(&self) -> usize {
        self.heads.len()
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    /// First value in `bucket` matching `pred`.
    pub(crate) fn find_mut(
        &mut self,
        bucket: usize,
        mut pred: impl FnMut(&T) -> bool,
    ) -> Option<&mut T> {
        let mut cursor = self.heads[bucket];
        let mut found = None;
        while let Some(id) = cursor {
            match &self.nodes[id.index()] {
                Node::Occupied { value, next } => {
                    if pred(value) {
                        found = Some(id);
                        break;
                    }
                    cursor = *next;
                }
                Node::Vacant { .. } => break,
            }
        }
        match &mut self.nodes[found?.index()] {
            Node::Occupied { value, .. } => Some(value),
            Node::Vacant { .. } => None,
        }
    }

    /// Links `value` in at the head of `bucket`.
    pub(crate) fn push_front(&mut self, bucket: usize, value: T) -> Result<(), ChainFull> {
        let next = self.heads[bucket];
        let id = if let Some(id) = self.free_head {
            let Node::Vacant { next_free } = &self.nodes[id.index()] else {
                debug_assert!(false, "free list points at an occupied slot");
                return Err(ChainFull);
            };
            self.free_head = *next_free;
            self.nodes[id.index()] = Node::Occupied { value, next };
            id
        } else if self.nodes.len() < self.capacity {
            let id = SlotId(u32::try_from(self.nodes.len()).map_err(|_| ChainFull)?);
            // Within the reserved capacity: no reallocation.
            self.nodes.push(Node::Occupied { value, next });
            id
        } else {
            return Err(ChainFull);
        };
        self.heads[bucket] = Some(id);
        self.len += 1;
        Ok(())
    }

    /// Unlinks every value in `bucket` matching `pred`, handing each to
    /// `removed`. Returns the number of values removed.
    pub(crate) fn remove_where(
        &mut self,
        bucket: usize,
        mut pred: impl FnMut(&T) -> bool,
        mut removed: impl FnMut(T),
    ) -> usize {
        let mut count = 0;
        let mut prev: Option<SlotId> = None;
        let mut cursor = self.heads[bucket];
        while let Some(id) = cursor {
            let (hit, next) = match &self.nodes[id.index()] {
                Node::Occupied { value, next } => (pred(value), *next),
                Node::Vacant { .. } => break,
            };
            if hit {
                match prev {
                    None => self.heads[bucket] = next,
                    Some(p) => self.set_next(p, next),
                }
                if let Some(value) = self.release(id) {
                    removed(value);
                    count += 1;
                }
            } else {
                prev = Some(id);
            }
            cursor = next;
        }
        count
    }

    /// [`remove_where`](Self::remove_where) across every bucket.
    pub(crate) fn remove_all_where(
        &mut self,
        mut pred: impl FnMut(&T) -> bool,
        mut removed: impl FnMut(T),
    ) -> usize {
        (0..self.heads.len())
            .map(|bucket| self.remove_where(bucket, &mut pred, &mut removed))
            .sum()
    }

    /// Values chained in `bucket`, head first.
    pub(crate) fn bucket(&self, bucket: usize) -> BucketIter<'_, T> {
        BucketIter {
            nodes: &self.nodes,
            cursor: self.heads[bucket],
        }
    }

    /// Every live value, bucket by bucket.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        (0..self.heads.len()).flat_map(move |b| self.bucket(b))
    }

    fn set_next(&mut self, id: SlotId, new_next: Option<SlotId>) {
        if let Node::Occupied { next, .. } = &mut self.nodes[id.index()] {
            *next = new_next;
        }
    }

    /// Moves the value out of `id` and pushes the slot onto the free list.
    fn release(&mut self, id: SlotId) -> Option<T> {
        let vacant = Node::Vacant {
            next_free: self.free_head,
        };
        match mem::replace(&mut self.nodes[id.index()], vacant) {
            Node::Occupied { value, .. } => {
                self.free_head = Some(id);
                self.len -= 1;
                Some(value)
            }
            original @ Node::Vacant { .. } => {
                self.nodes[id.index()] = original;
                None
            }
        }
    }
}

pub(crate) struct BucketIter<'a, T> {
    nodes: &'a [Node<T>],
    cursor: Option<SlotId>,
}

impl<'a, T> Iterator for BucketIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let nodes = self.nodes;
        match &nodes[self.cursor?.index()] {
            Node::Occupied { value, next } => {
                self.cursor = *next;
                Some(value)
            }
            Node::Vacant { .. } => {
                self.cursor = None;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(c: &BucketChains<u32>, bucket: usize) -> Vec<u32> {
        c.bucket(bucket).copied().collect()
    }

    #[test]
    fn push_links_at_head() {
        let mut c = BucketChains::new(4, 8);
        c.push_front(1, 10).unwrap();
        c.push_front(1, 11).unwrap();
        c.push_front(2, 20).unwrap();
        assert_eq!(collect(&c, 1), [11, 10]);
        assert_eq!(collect(&c, 2), [20]);
        assert!(collect(&c, 0).is_empty());
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn full_arena_rejects_push_without_side_effects() {
        let mut c = BucketChains::new(2, 2);
        c.push_front(0, 1).unwrap();
        c.push_front(1, 2).unwrap();
        assert_eq!(c.push_front(0, 3), Err(ChainFull));
        assert_eq!(collect(&c, 0), [1]);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn removal_unlinks_head_middle_and_tail() {
        let mut c = BucketChains::new(1, 8);
        for v in [1, 2, 3, 4, 5] {
            c.push_front(0, v).unwrap();
        }
        // chain is 5 4 3 2 1
        let mut gone = Vec::new();
        let n = c.remove_where(0, |v| v % 2 == 1, |v| gone.push(v));
        assert_eq!(n, 3);
        assert_eq!(gone, [5, 3, 1]);
        assert_eq!(collect(&c, 0), [4, 2]);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn freed_slots_are_recycled() {
        let mut c = BucketChains::new(2, 2);
        c.push_front(0, 1).unwrap();
        c.push_front(1, 2).unwrap();
        c.remove_where(0, |_| true, drop);
        c.push_front(1, 3).unwrap();
        assert_eq!(collect(&c, 1), [3, 2]);
        assert_eq!(c.push_front(0, 4), Err(ChainFull));
    }

    #[test]
    fn find_mut_edits_in_place() {
        let mut c = BucketChains::new(2, 4);
        c.push_front(0, 7).unwrap();
        c.push_front(0, 8).unwrap();
        *c.find_mut(0, |v| *v == 7).unwrap() = 70;
        assert!(c.find_mut(1, |v| *v == 8).is_none());
        assert_eq!(collect(&c, 0), [8, 70]);
    }

    #[test]
    fn remove_all_spans_buckets() {
        let mut c = BucketChains::new(4, 16);
        for v in 0..12u32 {
            c.push_front((v % 4) as usize, v).unwrap();
        }
        let n = c.remove_all_where(|v| *v >= 6, drop);
        assert_eq!(n, 6);
        let mut left: Vec<u32> = c.iter().copied().collect();
        left.sort_unstable();
        assert_eq!(left, [0, 1, 2, 3, 4, 5]);
    }
}
