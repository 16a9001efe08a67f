//! # GridHouse Engine
//!
//! Provide the in-memory data plane: a sharded keyspace with per-key TTL
//! and lazy expiration, and the typed value containers behind it.
//!
//! ## Usage
//!
//! - Use `Keyspace::new()` for the default 256-shard keyspace.
//! - Use `Keyspace::start_sweeper` to enable active TTL cleanup in the
//!   background; the returned handle must be stopped on shutdown.
//! - Containers returned by `get_or_create_*` are internally locked, so the
//!   shard lock is never held across container work.

mod hash;
mod keyspace;
mod list;
mod set;
mod stream;
mod value;
mod zset;

pub use hash::{format_float, HashValue};
pub use keyspace::{Keyspace, SweeperHandle, Ttl, SHARD_COUNT};
pub use list::ListValue;
pub use set::SetValue;
pub use stream::{StreamEntry, StreamId, StreamValue};
pub use value::{DataType, Value};
pub use zset::ZSetValue;
