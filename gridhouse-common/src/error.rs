//! # Error Taxonomy
//!
//! Purpose: Give the engine, server, and client one shared error type so
//! command handlers can turn failures into RESP replies without guessing.
//!
//! ## Design Principles
//! 1. **Reply-Shaped Variants**: Each variant maps onto exactly one RESP
//!    error reply the wire layer knows how to emit.
//! 2. **No Panics**: Library code propagates `GridResult` with `?`; only
//!    tests unwrap.

use thiserror::Error;

/// Result type used across GridHouse crates.
pub type GridResult<T> = Result<T, GridError>;

/// Errors surfaced by the keyspace, containers, codecs, and wire layer.
#[derive(Debug, Error)]
pub enum GridError {
    /// RESP framing violation (bad prefix, oversize length, missing CRLF).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation applied to a key holding a different container type.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Value could not be parsed as a 64-bit signed integer.
    #[error("value is not an integer or out of range")]
    NotInteger,

    /// Value could not be parsed as a float.
    #[error("value is not a valid float")]
    NotFloat,

    /// Stream append with an id not strictly greater than the last entry.
    #[error("The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdTooSmall,

    /// Malformed stream id literal.
    #[error("Invalid stream ID specified as stream command argument")]
    BadStreamId,

    /// Snapshot file is corrupt or from an unknown version.
    #[error("snapshot is malformed: {0}")]
    BadSnapshot(String),

    /// Replication handshake received something other than the expected reply.
    #[error("replication handshake failed: {0}")]
    Handshake(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GridError {
    /// Formats the error the way it appears on the wire, without the
    /// leading `-` marker.
    ///
    /// `WrongType` carries its own `WRONGTYPE` prefix; everything else is
    /// reported under `ERR`.
    pub fn wire_message(&self) -> String {
        match self {
            GridError::WrongType => self.to_string(),
            other => format!("ERR {other}"),
        }
    }
}
