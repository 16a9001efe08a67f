//! Key-management commands: DEL/EXISTS/KEYS/DBSIZE, the expiration family,
//! FLUSHDB, and SELECT.

use gridhouse_common::now_ms;

use crate::commands::parse_int;
use crate::resp::Reply;
use crate::server::Shared;

pub fn del(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let removed = args
        .iter()
        .filter(|key| shared.keyspace.remove(key.as_slice()))
        .count();
    Reply::Integer(removed as i64)
}

pub fn exists(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let present = args
        .iter()
        .filter(|key| shared.keyspace.exists(key.as_slice()))
        .count();
    Reply::Integer(present as i64)
}

/// KEYS pattern — glob match with `*` and `?` over a keyspace snapshot.
pub fn keys(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let pattern = &args[0];
    let matches = shared
        .keyspace
        .keys()
        .into_iter()
        .filter(|key| glob_match(pattern, key))
        .map(Reply::bulk)
        .collect();
    Reply::Array(matches)
}

pub fn dbsize(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let _ = args;
    Reply::Integer(shared.keyspace.len() as i64)
}

/// FLUSHDB clears the keyspace, queues a log truncation, deletes the
/// snapshot, and resets the change counter. As a write it also reaches
/// the log and the replicas, so replay and replica state clear too.
pub fn flushdb(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let _ = args;
    shared.keyspace.clear();
    shared.persistence.flush_db();
    Reply::ok()
}

pub fn expire(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let seconds = match parse_int(&args[1]) {
        Ok(seconds) => seconds,
        Err(reply) => return reply,
    };
    apply_deadline(shared, &args[0], seconds.saturating_mul(1000))
}

pub fn pexpire(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let millis = match parse_int(&args[1]) {
        Ok(millis) => millis,
        Err(reply) => return reply,
    };
    apply_deadline(shared, &args[0], millis)
}

/// A non-positive TTL deletes the key outright, matching Redis.
fn apply_deadline(shared: &Shared, key: &[u8], delta_ms: i64) -> Reply {
    if delta_ms <= 0 {
        if shared.keyspace.exists(key) {
            shared.keyspace.remove(key);
            return Reply::Integer(1);
        }
        return Reply::Integer(0);
    }
    let deadline = now_ms() + delta_ms as u64;
    Reply::Integer(shared.keyspace.expire_at(key, deadline) as i64)
}

pub fn ttl(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    use gridhouse_engine::Ttl;
    match shared.keyspace.ttl_state(&args[0]) {
        Ttl::Missing => Reply::Integer(-2),
        Ttl::NoExpiry => Reply::Integer(-1),
        // Round up so a key with time left never reports zero.
        Ttl::Remaining(ms) => Reply::Integer(((ms + 999) / 1000) as i64),
    }
}

pub fn pttl(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    use gridhouse_engine::Ttl;
    match shared.keyspace.ttl_state(&args[0]) {
        Ttl::Missing => Reply::Integer(-2),
        Ttl::NoExpiry => Reply::Integer(-1),
        Ttl::Remaining(ms) => Reply::Integer(ms as i64),
    }
}

/// Single-keyspace server: only database 0 exists.
pub fn select(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let _ = shared;
    if args[0] == b"0" {
        Reply::ok()
    } else {
        Reply::error("ERR DB index is out of range")
    }
}

/// Minimal glob: `*` matches any run, `?` matches one byte, everything
/// else is literal.
pub(crate) fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text)
                || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}
