//! # Set Container
//!
//! Unordered collection of unique byte strings with membership tests and
//! random pop. The pop order is whatever the hash iteration yields.

use ahash::RandomState;
use hashbrown::HashSet;
use parking_lot::RwLock;

/// Unordered set of unique members.
#[derive(Debug, Default)]
pub struct SetValue {
    members: RwLock<HashSet<Vec<u8>, RandomState>>,
}

impl SetValue {
    pub fn new() -> Self {
        SetValue {
            members: RwLock::new(HashSet::with_hasher(RandomState::new())),
        }
    }

    /// Returns true when the member was not already present.
    pub fn add(&self, member: Vec<u8>) -> bool {
        self.members.write().insert(member)
    }

    /// Returns true when the member was present and removed.
    pub fn remove(&self, member: &[u8]) -> bool {
        self.members.write().remove(member)
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.members.read().contains(member)
    }

    /// Removes and returns one member in iteration order.
    pub fn pop(&self) -> Option<Vec<u8>> {
        let mut members = self.members.write();
        let picked = members.iter().next().cloned()?;
        members.remove(&picked);
        Some(picked)
    }

    pub fn members(&self) -> Vec<Vec<u8>> {
        self.members.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    pub fn mem_usage(&self) -> usize {
        self.members.read().iter().map(Vec::len).sum()
    }
}
