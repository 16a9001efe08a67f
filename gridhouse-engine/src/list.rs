//! # List Container
//!
//! Purpose: Back the list commands with a growable ring deque that supports
//! O(1) push/pop at both ends and Redis-style negative indexing.
//!
//! ## Design Principles
//! 1. **Internal Lock**: The container owns its lock so the shard lock can
//!    release right after lookup; contention stays per-container.
//! 2. **Bounded Memory**: Capacity shrinks once occupancy drops below a
//!    quarter, so a drained queue does not pin its high-water allocation.

use std::collections::VecDeque;

use parking_lot::RwLock;

/// Capacity below which the deque is never shrunk.
const SHRINK_FLOOR: usize = 64;

/// Ordered sequence of byte strings with two-ended access.
#[derive(Debug, Default)]
pub struct ListValue {
    items: RwLock<VecDeque<Vec<u8>>>,
}

impl ListValue {
    pub fn new() -> Self {
        ListValue {
            items: RwLock::new(VecDeque::new()),
        }
    }

    /// Prepends one element and returns the new length.
    pub fn push_front(&self, value: Vec<u8>) -> usize {
        let mut items = self.items.write();
        items.push_front(value);
        items.len()
    }

    /// Appends one element and returns the new length.
    pub fn push_back(&self, value: Vec<u8>) -> usize {
        let mut items = self.items.write();
        items.push_back(value);
        items.len()
    }

    pub fn pop_front(&self) -> Option<Vec<u8>> {
        let mut items = self.items.write();
        let value = items.pop_front();
        maybe_shrink(&mut items);
        value
    }

    pub fn pop_back(&self) -> Option<Vec<u8>> {
        let mut items = self.items.write();
        let value = items.pop_back();
        maybe_shrink(&mut items);
        value
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Returns the inclusive `[start, stop]` window with negative indexing
    /// (`-1` is the last element). Out-of-window requests yield an empty
    /// vector; the result is freshly allocated.
    pub fn range(&self, start: i64, stop: i64) -> Vec<Vec<u8>> {
        let items = self.items.read();
        match resolve_window(items.len(), start, stop) {
            Some((lo, hi)) => items.iter().skip(lo).take(hi - lo + 1).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Removes occurrences of `value`: `count > 0` scans from the head,
    /// `count < 0` from the tail, `count == 0` removes all. Returns the
    /// number of removed elements.
    pub fn remove(&self, count: i64, value: &[u8]) -> usize {
        let mut items = self.items.write();
        let limit = count.unsigned_abs() as usize;
        let mut removed = 0;

        if count >= 0 {
            let mut index = 0;
            while index < items.len() {
                if items[index] == value && (count == 0 || removed < limit) {
                    items.remove(index);
                    removed += 1;
                } else {
                    index += 1;
                }
            }
        } else {
            let mut index = items.len();
            while index > 0 {
                index -= 1;
                if items[index] == value && removed < limit {
                    items.remove(index);
                    removed += 1;
                }
            }
        }

        maybe_shrink(&mut items);
        removed
    }

    /// Keeps only the inclusive `[start, stop]` window; everything outside
    /// is dropped. An empty window clears the list.
    pub fn trim(&self, start: i64, stop: i64) {
        let mut items = self.items.write();
        match resolve_window(items.len(), start, stop) {
            Some((lo, hi)) => {
                items.truncate(hi + 1);
                items.drain(..lo);
            }
            None => items.clear(),
        }
        maybe_shrink(&mut items);
    }

    /// Front-to-back snapshot for persistence.
    pub fn items(&self) -> Vec<Vec<u8>> {
        self.items.read().iter().cloned().collect()
    }

    pub fn mem_usage(&self) -> usize {
        self.items.read().iter().map(Vec::len).sum()
    }
}

/// Resolves a Redis-style inclusive window against `len`, or `None` when
/// the window is empty.
fn resolve_window(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let lo = if start < 0 { (len + start).max(0) } else { start };
    let hi = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if lo >= len || hi < lo {
        return None;
    }
    Some((lo as usize, hi as usize))
}

/// Gives memory back once occupancy falls below a quarter of capacity,
/// never below the shrink floor.
fn maybe_shrink(items: &mut VecDeque<Vec<u8>>) {
    if items.capacity() > SHRINK_FLOOR && items.len() < items.capacity() / 4 {
        items.shrink_to(items.len().max(SHRINK_FLOOR));
    }
}
