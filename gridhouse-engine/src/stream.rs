//! # Stream Container
//!
//! Append-only sequence of entries keyed by a 128-bit `(ms, seq)` id.
//! Ids must strictly increase across appends; auto-generated ids stay
//! monotonic even when the wall clock runs backwards.

use std::fmt;

use parking_lot::RwLock;

use gridhouse_common::{GridError, GridResult};

/// Composite stream entry id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub const fn new(ms: u64, seq: u64) -> Self {
        StreamId { ms, seq }
    }

    /// Parses `ms-seq` or bare `ms` (sequence defaults to `default_seq`,
    /// which differs between range starts and range ends).
    pub fn parse(raw: &[u8], default_seq: u64) -> GridResult<Self> {
        let text = std::str::from_utf8(raw).map_err(|_| GridError::BadStreamId)?;
        let (ms_part, seq_part) = match text.split_once('-') {
            Some((ms, seq)) => (ms, Some(seq)),
            None => (text, None),
        };
        let ms = ms_part.parse().map_err(|_| GridError::BadStreamId)?;
        let seq = match seq_part {
            Some(seq) => seq.parse().map_err(|_| GridError::BadStreamId)?,
            None => default_seq,
        };
        Ok(StreamId { ms, seq })
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// One stream entry: id plus its field/value pairs in append order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct StreamInner {
    entries: Vec<StreamEntry>,
    last_ms: u64,
    last_seq: u64,
}

/// Append-only ordered sequence of entries.
#[derive(Debug, Default)]
pub struct StreamValue {
    inner: RwLock<StreamInner>,
}

impl StreamValue {
    pub fn new() -> Self {
        StreamValue::default()
    }

    /// Appends an entry with an auto-generated id: `(now_ms, 0)` when the
    /// clock moved past the last entry, `(last_ms, last_seq + 1)` otherwise.
    pub fn add_auto(&self, fields: Vec<(Vec<u8>, Vec<u8>)>, now_ms: u64) -> StreamId {
        let mut inner = self.inner.write();
        let id = if now_ms > inner.last_ms {
            StreamId::new(now_ms, 0)
        } else {
            StreamId::new(inner.last_ms, inner.last_seq + 1)
        };
        push_entry(&mut inner, id, fields);
        id
    }

    /// Appends an entry with an explicit id, which must strictly exceed the
    /// id of the last entry.
    pub fn add(&self, id: StreamId, fields: Vec<(Vec<u8>, Vec<u8>)>) -> GridResult<StreamId> {
        let mut inner = self.inner.write();
        let last = StreamId::new(inner.last_ms, inner.last_seq);
        if id <= last {
            return Err(GridError::StreamIdTooSmall);
        }
        push_entry(&mut inner, id, fields);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn last_id(&self) -> StreamId {
        let inner = self.inner.read();
        StreamId::new(inner.last_ms, inner.last_seq)
    }

    /// Inclusive id range scan in append order, optionally bounded by
    /// `count`.
    pub fn range(&self, start: StreamId, end: StreamId, count: Option<usize>) -> Vec<StreamEntry> {
        let inner = self.inner.read();
        let selected = inner
            .entries
            .iter()
            .filter(|entry| entry.id >= start && entry.id <= end)
            .cloned();
        match count {
            Some(limit) => selected.take(limit).collect(),
            None => selected.collect(),
        }
    }

    /// Deletes entries by id, returning how many existed.
    pub fn delete(&self, ids: &[StreamId]) -> usize {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|entry| !ids.contains(&entry.id));
        before - inner.entries.len()
    }

    /// Drops the oldest entries until at most `max_len` remain; returns the
    /// number evicted. The last-id cache is untouched so ids keep growing.
    pub fn trim_max_len(&self, max_len: usize) -> usize {
        let mut inner = self.inner.write();
        if inner.entries.len() <= max_len {
            return 0;
        }
        let evict = inner.entries.len() - max_len;
        inner.entries.drain(..evict);
        evict
    }

    /// Append-order snapshot for persistence.
    pub fn entries(&self) -> Vec<StreamEntry> {
        self.inner.read().entries.clone()
    }

    /// Restores the last-id cache after loading a snapshot. A trimmed
    /// stream remembers ids past its oldest surviving entry; without this
    /// the next append could reuse an evicted id.
    pub fn restore_last_id(&self, id: StreamId) {
        let mut inner = self.inner.write();
        if id > StreamId::new(inner.last_ms, inner.last_seq) {
            inner.last_ms = id.ms;
            inner.last_seq = id.seq;
        }
    }

    pub fn mem_usage(&self) -> usize {
        self.inner
            .read()
            .entries
            .iter()
            .map(|entry| {
                entry
                    .fields
                    .iter()
                    .map(|(field, value)| field.len() + value.len())
                    .sum::<usize>()
            })
            .sum()
    }
}

fn push_entry(inner: &mut StreamInner, id: StreamId, fields: Vec<(Vec<u8>, Vec<u8>)>) {
    inner.last_ms = id.ms;
    inner.last_seq = id.seq;
    inner.entries.push(StreamEntry { id, fields });
}
