//! Hash commands, including the in-place numeric increments.

use gridhouse_engine::format_float;

use crate::commands::{drop_if_empty, parse_float, parse_int};
use crate::resp::Reply;
use crate::server::Shared;

/// HSET key field value [field value ...] — returns the number of new
/// fields.
pub fn hset(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    if args[1..].len() % 2 != 0 {
        return Reply::error("ERR wrong number of arguments for 'hset'");
    }
    let hash = match shared.keyspace.get_or_create_hash(&args[0]) {
        Ok(hash) => hash,
        Err(err) => return Reply::from_err(err),
    };
    let created = args[1..]
        .chunks_exact(2)
        .filter(|pair| hash.set(pair[0].clone(), pair[1].clone()))
        .count();
    Reply::Integer(created as i64)
}

pub fn hget(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_hash(&args[0]) {
        Ok(Some(hash)) => hash.get(&args[1]).map(Reply::bulk).unwrap_or(Reply::Nil),
        Ok(None) => Reply::Nil,
        Err(err) => Reply::from_err(err),
    }
}

/// HGETALL key — alternating field/value bulks.
pub fn hgetall(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_hash(&args[0]) {
        Ok(Some(hash)) => {
            let mut items = Vec::with_capacity(hash.len() * 2);
            for (field, value) in hash.entries() {
                items.push(Reply::bulk(field));
                items.push(Reply::bulk(value));
            }
            Reply::Array(items)
        }
        Ok(None) => Reply::Array(Vec::new()),
        Err(err) => Reply::from_err(err),
    }
}

pub fn hdel(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_hash(&args[0]) {
        Ok(Some(hash)) => {
            let removed = args[1..]
                .iter()
                .filter(|field| hash.remove(field.as_slice()))
                .count();
            drop_if_empty(shared, &args[0], hash.is_empty());
            Reply::Integer(removed as i64)
        }
        Ok(None) => Reply::Integer(0),
        Err(err) => Reply::from_err(err),
    }
}

pub fn hincrby(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let delta = match parse_int(&args[2]) {
        Ok(delta) => delta,
        Err(reply) => return reply,
    };
    let hash = match shared.keyspace.get_or_create_hash(&args[0]) {
        Ok(hash) => hash,
        Err(err) => return Reply::from_err(err),
    };
    match hash.incr_by(&args[1], delta) {
        Ok(value) => Reply::Integer(value),
        Err(err) => Reply::from_err(err),
    }
}

pub fn hincrbyfloat(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let delta = match parse_float(&args[2]) {
        Ok(delta) => delta,
        Err(reply) => return reply,
    };
    let hash = match shared.keyspace.get_or_create_hash(&args[0]) {
        Ok(hash) => hash,
        Err(err) => return Reply::from_err(err),
    };
    match hash.incr_by_float(&args[1], delta) {
        Ok(value) => Reply::bulk(format_float(value).into_bytes()),
        Err(err) => Reply::from_err(err),
    }
}

pub fn hkeys(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_hash(&args[0]) {
        Ok(Some(hash)) => Reply::Array(hash.keys().into_iter().map(Reply::bulk).collect()),
        Ok(None) => Reply::Array(Vec::new()),
        Err(err) => Reply::from_err(err),
    }
}

pub fn hvals(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_hash(&args[0]) {
        Ok(Some(hash)) => Reply::Array(hash.values().into_iter().map(Reply::bulk).collect()),
        Ok(None) => Reply::Array(Vec::new()),
        Err(err) => Reply::from_err(err),
    }
}

pub fn hlen(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_hash(&args[0]) {
        Ok(Some(hash)) => Reply::Integer(hash.len() as i64),
        Ok(None) => Reply::Integer(0),
        Err(err) => Reply::from_err(err),
    }
}

pub fn hexists(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_hash(&args[0]) {
        Ok(Some(hash)) => Reply::Integer(hash.contains(&args[1]) as i64),
        Ok(None) => Reply::Integer(0),
        Err(err) => Reply::from_err(err),
    }
}
