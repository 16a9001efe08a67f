//! # Hash Container
//!
//! Field-to-value mapping with unique fields and in-place numeric
//! increments. Increments parse the stored bytes, compute, and store the
//! reformatted result back (shortest round-trip representation for floats).

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;

use gridhouse_common::{GridError, GridResult};

/// Mapping from field name to byte value.
#[derive(Debug, Default)]
pub struct HashValue {
    fields: RwLock<HashMap<Vec<u8>, Vec<u8>, RandomState>>,
}

impl HashValue {
    pub fn new() -> Self {
        HashValue {
            fields: RwLock::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    /// Sets a field, returning true when the field is new.
    pub fn set(&self, field: Vec<u8>, value: Vec<u8>) -> bool {
        self.fields.write().insert(field, value).is_none()
    }

    pub fn get(&self, field: &[u8]) -> Option<Vec<u8>> {
        self.fields.read().get(field).cloned()
    }

    /// Returns true when the field was present and removed.
    pub fn remove(&self, field: &[u8]) -> bool {
        self.fields.write().remove(field).is_some()
    }

    pub fn contains(&self, field: &[u8]) -> bool {
        self.fields.read().contains_key(field)
    }

    /// Adds `delta` to an integer field, creating it at zero when absent.
    ///
    /// The read-modify-write runs under the container's write lock, so
    /// concurrent increments never lose updates.
    pub fn incr_by(&self, field: &[u8], delta: i64) -> GridResult<i64> {
        let mut fields = self.fields.write();
        let current = match fields.get(field) {
            Some(raw) => parse_i64(raw)?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(GridError::NotInteger)?;
        fields.insert(field.to_vec(), next.to_string().into_bytes());
        Ok(next)
    }

    /// Adds `delta` to a float field, creating it at zero when absent.
    pub fn incr_by_float(&self, field: &[u8], delta: f64) -> GridResult<f64> {
        let mut fields = self.fields.write();
        let current = match fields.get(field) {
            Some(raw) => parse_f64(raw)?,
            None => 0.0,
        };
        let next = current + delta;
        if !next.is_finite() {
            return Err(GridError::NotFloat);
        }
        fields.insert(field.to_vec(), format_float(next).into_bytes());
        Ok(next)
    }

    pub fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.fields
            .read()
            .iter()
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }

    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.fields.read().keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<Vec<u8>> {
        self.fields.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.read().is_empty()
    }

    pub fn mem_usage(&self) -> usize {
        self.fields
            .read()
            .iter()
            .map(|(field, value)| field.len() + value.len())
            .sum()
    }
}

/// Shortest round-trip decimal representation; `3.0` renders as `3`.
pub fn format_float(value: f64) -> String {
    format!("{value}")
}

pub(crate) fn parse_i64(raw: &[u8]) -> GridResult<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(GridError::NotInteger)
}

pub(crate) fn parse_f64(raw: &[u8]) -> GridResult<f64> {
    let value: f64 = std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(GridError::NotFloat)?;
    if value.is_nan() {
        return Err(GridError::NotFloat);
    }
    Ok(value)
}
