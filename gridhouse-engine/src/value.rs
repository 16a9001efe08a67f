//! # Typed Values
//!
//! Purpose: Define the tagged value variant stored by every keyspace entry.
//!
//! ## Design Principles
//! 1. **Tagged Variant**: One enum, one type tag; commands inspect the tag
//!    and either operate or report a type mismatch.
//! 2. **Arc-backed Containers**: Cloning a `Value` shares the container, so
//!    shard locks release before any container work starts.

use std::sync::Arc;

use bytes::Bytes;

use crate::hash::HashValue;
use crate::list::ListValue;
use crate::set::SetValue;
use crate::stream::StreamValue;
use crate::zset::ZSetValue;

/// Type tag for a keyspace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Str,
    List,
    Set,
    Hash,
    ZSet,
    Stream,
}

impl DataType {
    /// Wire name as reported by `TYPE`-style introspection.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Str => "string",
            DataType::List => "list",
            DataType::Set => "set",
            DataType::Hash => "hash",
            DataType::ZSet => "zset",
            DataType::Stream => "stream",
        }
    }
}

/// A single keyspace value.
///
/// Strings are immutable byte buffers; every other variant is a shared,
/// internally locked container owned by exactly one entry.
#[derive(Debug, Clone)]
pub enum Value {
    Str(Bytes),
    List(Arc<ListValue>),
    Set(Arc<SetValue>),
    Hash(Arc<HashValue>),
    ZSet(Arc<ZSetValue>),
    Stream(Arc<StreamValue>),
}

impl Value {
    /// Returns the type tag for this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Str(_) => DataType::Str,
            Value::List(_) => DataType::List,
            Value::Set(_) => DataType::Set,
            Value::Hash(_) => DataType::Hash,
            Value::ZSet(_) => DataType::ZSet,
            Value::Stream(_) => DataType::Stream,
        }
    }

    /// Rough payload size in bytes, used for memory reporting and
    /// admission checks. Ignores allocator overhead.
    pub fn size_hint(&self) -> usize {
        match self {
            Value::Str(data) => data.len(),
            Value::List(list) => list.mem_usage(),
            Value::Set(set) => set.mem_usage(),
            Value::Hash(hash) => hash.mem_usage(),
            Value::ZSet(zset) => zset.mem_usage(),
            Value::Stream(stream) => stream.mem_usage(),
        }
    }
}
