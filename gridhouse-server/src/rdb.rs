//! # Snapshot Codec
//!
//! Purpose: Serialize the whole keyspace to a compact binary file and load
//! it back, for startup recovery, periodic saves, and full-resync payloads.
//!
//! ## Format
//!
//! Little-endian, length-prefixed records behind an 8-byte magic:
//!
//! ```text
//! header:  magic "GHSNAP01" | u64 key count | u64 ttl count
//! record:  u8 type tag | u32 key len | key bytes | u64 expires_at_ms
//!          | type-specific payload
//! footer:  u8 0xFF end marker
//! ```
//!
//! Hash fields are written in sorted order so identical keyspaces encode
//! identically. Lists are written front-to-back and loaded by tail-append,
//! so round-trips preserve order. Expirations are absolute Unix-ms
//! instants (`0` = none); entries already expired at load time are
//! dropped.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use gridhouse_common::{now_ms, GridError, GridResult};
use gridhouse_engine::{Keyspace, StreamId, Value};

const MAGIC: &[u8; 8] = b"GHSNAP01";
const END_MARKER: u8 = 0xFF;

const TAG_STRING: u8 = 0;
const TAG_LIST: u8 = 1;
const TAG_SET: u8 = 2;
const TAG_HASH: u8 = 3;
const TAG_ZSET: u8 = 4;
const TAG_STREAM: u8 = 5;

/// Longest single blob accepted by the loader; a larger length prefix
/// means corruption, not data.
const MAX_BLOB_LEN: usize = 512 * 1024 * 1024;

/// Serializes every live key into an in-memory snapshot. Shards are read
/// one at a time; no global lock is held.
pub fn encode(keyspace: &Keyspace) -> Vec<u8> {
    let snapshot = keyspace.snapshot();
    let ttl_count = snapshot.iter().filter(|(_, _, expires)| *expires != 0).count();

    let mut out = Vec::with_capacity(64 + snapshot.len() * 32);
    out.extend_from_slice(MAGIC);
    write_u64(&mut out, snapshot.len() as u64);
    write_u64(&mut out, ttl_count as u64);

    for (key, value, expires_at) in snapshot {
        encode_record(&mut out, &key, &value, expires_at);
    }
    out.push(END_MARKER);
    out
}

fn encode_record(out: &mut Vec<u8>, key: &[u8], value: &Value, expires_at: u64) {
    match value {
        Value::Str(data) => {
            out.push(TAG_STRING);
            write_blob(out, key);
            write_u64(out, expires_at);
            write_blob(out, data);
        }
        Value::List(list) => {
            out.push(TAG_LIST);
            write_blob(out, key);
            write_u64(out, expires_at);
            let items = list.items();
            write_u32(out, items.len() as u32);
            for item in items {
                write_blob(out, &item);
            }
        }
        Value::Set(set) => {
            out.push(TAG_SET);
            write_blob(out, key);
            write_u64(out, expires_at);
            let members = set.members();
            write_u32(out, members.len() as u32);
            for member in members {
                write_blob(out, &member);
            }
        }
        Value::Hash(hash) => {
            out.push(TAG_HASH);
            write_blob(out, key);
            write_u64(out, expires_at);
            let mut entries = hash.entries();
            // Stable encoding: identical hashes produce identical bytes.
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            write_u32(out, entries.len() as u32);
            for (field, value) in entries {
                write_blob(out, &field);
                write_blob(out, &value);
            }
        }
        Value::ZSet(zset) => {
            out.push(TAG_ZSET);
            write_blob(out, key);
            write_u64(out, expires_at);
            let entries = zset.entries();
            write_u32(out, entries.len() as u32);
            for (member, score) in entries {
                write_blob(out, &member);
                out.extend_from_slice(&score.to_le_bytes());
            }
        }
        Value::Stream(stream) => {
            out.push(TAG_STREAM);
            write_blob(out, key);
            write_u64(out, expires_at);
            let last = stream.last_id();
            write_u64(out, last.ms);
            write_u64(out, last.seq);
            let entries = stream.entries();
            write_u32(out, entries.len() as u32);
            for entry in entries {
                write_u64(out, entry.id.ms);
                write_u64(out, entry.id.seq);
                write_u32(out, entry.fields.len() as u32);
                for (field, value) in entry.fields {
                    write_blob(out, &field);
                    write_blob(out, &value);
                }
            }
        }
    }
}

/// Writes a snapshot to `path` via a temp file + rename, so a crash never
/// leaves a half-written snapshot in place.
pub fn write(path: &Path, keyspace: &Keyspace) -> std::io::Result<()> {
    let encoded = encode(keyspace);
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&encoded)?;
        file.sync_data()?;
    }
    std::fs::rename(&tmp, path)
}

/// Loads a snapshot file into `keyspace`. Existing entries for loaded keys
/// are replaced; other entries are untouched.
pub fn load(path: &Path, keyspace: &Keyspace) -> GridResult<u64> {
    let data = std::fs::read(path)?;
    load_bytes(&data, keyspace)
}

/// Decodes a snapshot byte payload into `keyspace`, returning the number
/// of keys installed.
pub fn load_bytes(data: &[u8], keyspace: &Keyspace) -> GridResult<u64> {
    let mut cursor = Cursor::new(data);

    let mut magic = [0u8; 8];
    cursor
        .read_exact(&mut magic)
        .map_err(|_| GridError::BadSnapshot("truncated header".to_string()))?;
    if &magic != MAGIC {
        return Err(GridError::BadSnapshot("bad magic".to_string()));
    }
    let key_count = read_u64(&mut cursor)?;
    let _ttl_count = read_u64(&mut cursor)?;

    let now = now_ms();
    let mut installed = 0;
    for _ in 0..key_count {
        let tag = cursor.read_u8().map_err(truncated)?;
        let key = read_blob(&mut cursor)?;
        let expires_at = read_u64(&mut cursor)?;

        let value = decode_value(&mut cursor, tag)?;
        // Entries that died while the snapshot sat on disk stay dead.
        if expires_at != 0 && now > expires_at {
            continue;
        }
        keyspace.install(key, value, expires_at);
        installed += 1;
    }

    let marker = cursor.read_u8().map_err(truncated)?;
    if marker != END_MARKER {
        return Err(GridError::BadSnapshot("missing end marker".to_string()));
    }
    Ok(installed)
}

fn decode_value(cursor: &mut Cursor<&[u8]>, tag: u8) -> GridResult<Value> {
    use std::sync::Arc;

    use gridhouse_engine::{HashValue, ListValue, SetValue, StreamEntry, StreamValue, ZSetValue};

    match tag {
        TAG_STRING => {
            let data = read_blob(cursor)?;
            Ok(Value::Str(bytes::Bytes::from(data)))
        }
        TAG_LIST => {
            let list = ListValue::new();
            let count = read_u32(cursor)?;
            // Tail-append preserves the stored order on round-trip.
            for _ in 0..count {
                list.push_back(read_blob(cursor)?);
            }
            Ok(Value::List(Arc::new(list)))
        }
        TAG_SET => {
            let set = SetValue::new();
            let count = read_u32(cursor)?;
            for _ in 0..count {
                set.add(read_blob(cursor)?);
            }
            Ok(Value::Set(Arc::new(set)))
        }
        TAG_HASH => {
            let hash = HashValue::new();
            let count = read_u32(cursor)?;
            for _ in 0..count {
                let field = read_blob(cursor)?;
                let value = read_blob(cursor)?;
                hash.set(field, value);
            }
            Ok(Value::Hash(Arc::new(hash)))
        }
        TAG_ZSET => {
            let zset = ZSetValue::new();
            let count = read_u32(cursor)?;
            for _ in 0..count {
                let member = read_blob(cursor)?;
                let score = read_f64(cursor)?;
                zset.add(member, score);
            }
            Ok(Value::ZSet(Arc::new(zset)))
        }
        TAG_STREAM => {
            let stream = StreamValue::new();
            let last_ms = read_u64(cursor)?;
            let last_seq = read_u64(cursor)?;
            let count = read_u32(cursor)?;
            for _ in 0..count {
                let ms = read_u64(cursor)?;
                let seq = read_u64(cursor)?;
                let field_count = read_u32(cursor)?;
                let mut fields = Vec::with_capacity(field_count as usize);
                for _ in 0..field_count {
                    let field = read_blob(cursor)?;
                    let value = read_blob(cursor)?;
                    fields.push((field, value));
                }
                let entry = StreamEntry {
                    id: StreamId::new(ms, seq),
                    fields,
                };
                stream
                    .add(entry.id, entry.fields)
                    .map_err(|_| GridError::BadSnapshot("stream ids out of order".to_string()))?;
            }
            stream.restore_last_id(StreamId::new(last_ms, last_seq));
            Ok(Value::Stream(Arc::new(stream)))
        }
        other => Err(GridError::BadSnapshot(format!("unknown type tag {other}"))),
    }
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    // Infallible on Vec; byteorder keeps the endianness explicit.
    let _ = WriteBytesExt::write_u32::<LittleEndian>(out, value);
}

fn write_u64(out: &mut Vec<u8>, value: u64) {
    let _ = WriteBytesExt::write_u64::<LittleEndian>(out, value);
}

fn write_blob(out: &mut Vec<u8>, data: &[u8]) {
    write_u32(out, data.len() as u32);
    out.extend_from_slice(data);
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> GridResult<u32> {
    ReadBytesExt::read_u32::<LittleEndian>(cursor).map_err(truncated)
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> GridResult<u64> {
    ReadBytesExt::read_u64::<LittleEndian>(cursor).map_err(truncated)
}

fn read_f64(cursor: &mut Cursor<&[u8]>) -> GridResult<f64> {
    ReadBytesExt::read_f64::<LittleEndian>(cursor).map_err(truncated)
}

fn read_blob(cursor: &mut Cursor<&[u8]>) -> GridResult<Vec<u8>> {
    let len = read_u32(cursor)? as usize;
    if len > MAX_BLOB_LEN {
        return Err(GridError::BadSnapshot("blob length out of range".to_string()));
    }
    let mut data = vec![0u8; len];
    cursor.read_exact(&mut data).map_err(truncated)?;
    Ok(data)
}

fn truncated(_: std::io::Error) -> GridError {
    GridError::BadSnapshot("truncated record".to_string())
}
