//! # Sorted Set Container
//!
//! Purpose: Map members to float scores with ordered iteration by
//! (score asc, member byte-lex asc).
//!
//! ## Design Principles
//! 1. **Dual Index**: A hash map gives O(1) score lookup; a sorted vector
//!    serves ordered queries.
//! 2. **Lazy Rebuild**: Mutations only flip a dirty flag; the next ordered
//!    read re-sorts under the write lock.

use std::cmp::Ordering;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct ZSetInner {
    scores: HashMap<Vec<u8>, f64, RandomState>,
    ordered: Vec<(Vec<u8>, f64)>,
    dirty: bool,
}

impl ZSetInner {
    /// Re-sorts the ordered view when a mutation invalidated it.
    fn rebuild(&mut self) {
        if !self.dirty {
            return;
        }
        self.ordered = self
            .scores
            .iter()
            .map(|(member, &score)| (member.clone(), score))
            .collect();
        self.ordered.sort_unstable_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        self.dirty = false;
    }
}

/// Member-to-score mapping with an ordered view.
#[derive(Debug, Default)]
pub struct ZSetValue {
    inner: RwLock<ZSetInner>,
}

impl ZSetValue {
    pub fn new() -> Self {
        ZSetValue::default()
    }

    /// Inserts or updates a member, returning true when the member is new.
    ///
    /// Duplicate scores are allowed; duplicate members replace the score.
    pub fn add(&self, member: Vec<u8>, score: f64) -> bool {
        let mut inner = self.inner.write();
        let is_new = inner.scores.insert(member, score).is_none();
        inner.dirty = true;
        is_new
    }

    /// Returns true when the member was present and removed.
    pub fn remove(&self, member: &[u8]) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.scores.remove(member).is_some();
        if removed {
            inner.dirty = true;
        }
        removed
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.inner.read().scores.get(member).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.read().scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().scores.is_empty()
    }

    /// Inclusive `[start, stop]` window over the ordered view with negative
    /// indexing, as `(member, score)` pairs.
    pub fn range(&self, start: i64, stop: i64) -> Vec<(Vec<u8>, f64)> {
        let mut inner = self.inner.write();
        inner.rebuild();
        let len = inner.ordered.len();
        match resolve_window(len, start, stop) {
            Some((lo, hi)) => inner.ordered[lo..=hi].to_vec(),
            None => Vec::new(),
        }
    }

    /// Removes and returns the lowest-scored member.
    pub fn pop_min(&self) -> Option<(Vec<u8>, f64)> {
        let mut inner = self.inner.write();
        inner.rebuild();
        if inner.ordered.is_empty() {
            return None;
        }
        let (member, score) = inner.ordered.remove(0);
        inner.scores.remove(&member);
        Some((member, score))
    }

    /// Ordered snapshot for persistence.
    pub fn entries(&self) -> Vec<(Vec<u8>, f64)> {
        let mut inner = self.inner.write();
        inner.rebuild();
        inner.ordered.clone()
    }

    pub fn mem_usage(&self) -> usize {
        self.inner
            .read()
            .scores
            .keys()
            .map(|member| member.len() + std::mem::size_of::<f64>())
            .sum()
    }
}

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

#[cfg(test)]
mod tests {
    use super::*;

    fn members(range: &[(Vec<u8>, f64)]) -> Vec<&[u8]> {
        range.iter().map(|(member, _)| member.as_slice()).collect()
    }

    #[test]
    fn orders_by_score_then_member() {
        let zset = ZSetValue::new();
        zset.add(b"b".to_vec(), 2.0);
        zset.add(b"c".to_vec(), 1.0);
        zset.add(b"a".to_vec(), 2.0);

        let range = zset.range(0, -1);
        assert_eq!(members(&range), vec![b"c".as_slice(), b"a".as_slice(), b"b".as_slice()]);
    }

    #[test]
    fn add_updates_existing_member() {
        let zset = ZSetValue::new();
        assert!(zset.add(b"m".to_vec(), 1.0));
        assert!(!zset.add(b"m".to_vec(), 9.0));
        assert_eq!(zset.score(b"m"), Some(9.0));
        assert_eq!(zset.len(), 1);
    }

    #[test]
    fn pop_min_takes_lowest() {
        let zset = ZSetValue::new();
        zset.add(b"high".to_vec(), 10.0);
        zset.add(b"low".to_vec(), -1.0);

        assert_eq!(zset.pop_min(), Some((b"low".to_vec(), -1.0)));
        assert_eq!(zset.pop_min(), Some((b"high".to_vec(), 10.0)));
        assert_eq!(zset.pop_min(), None);
    }

    #[test]
    fn rebuild_after_interleaved_mutations() {
        let zset = ZSetValue::new();
        zset.add(b"a".to_vec(), 3.0);
        let _ = zset.range(0, -1);
        zset.add(b"b".to_vec(), 1.0);
        zset.remove(b"a");
        zset.add(b"c".to_vec(), 2.0);

        let range = zset.range(0, -1);
        assert_eq!(members(&range), vec![b"b".as_slice(), b"c".as_slice()]);
    }

    #[test]
    fn negative_window_selects_tail() {
        let zset = ZSetValue::new();
        for (member, score) in [(b"a", 1.0), (b"b", 2.0), (b"c", 3.0)] {
            zset.add(member.to_vec(), score);
        }
        let range = zset.range(-2, -1);
        assert_eq!(members(&range), vec![b"b".as_slice(), b"c".as_slice()]);
    }
}
