//! List commands over the ring-deque container.

use crate::commands::{drop_if_empty, parse_int};
use crate::resp::Reply;
use crate::server::Shared;

/// LPUSH key value [value ...] — values end up head-first, so the last
/// argument is the new head.
pub fn lpush(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let list = match shared.keyspace.get_or_create_list(&args[0]) {
        Ok(list) => list,
        Err(err) => return Reply::from_err(err),
    };
    let mut len = 0;
    for value in &args[1..] {
        len = list.push_front(value.clone());
    }
    Reply::Integer(len as i64)
}

pub fn rpush(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let list = match shared.keyspace.get_or_create_list(&args[0]) {
        Ok(list) => list,
        Err(err) => return Reply::from_err(err),
    };
    let mut len = 0;
    for value in &args[1..] {
        len = list.push_back(value.clone());
    }
    Reply::Integer(len as i64)
}

pub fn lpop(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_list(&args[0]) {
        Ok(Some(list)) => {
            let popped = list.pop_front();
            drop_if_empty(shared, &args[0], list.is_empty());
            popped.map(Reply::bulk).unwrap_or(Reply::Nil)
        }
        Ok(None) => Reply::Nil,
        Err(err) => Reply::from_err(err),
    }
}

pub fn rpop(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_list(&args[0]) {
        Ok(Some(list)) => {
            let popped = list.pop_back();
            drop_if_empty(shared, &args[0], list.is_empty());
            popped.map(Reply::bulk).unwrap_or(Reply::Nil)
        }
        Ok(None) => Reply::Nil,
        Err(err) => Reply::from_err(err),
    }
}

pub fn lrange(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let (start, stop) = match (parse_int(&args[1]), parse_int(&args[2])) {
        (Ok(start), Ok(stop)) => (start, stop),
        (Err(reply), _) | (_, Err(reply)) => return reply,
    };
    match shared.keyspace.get_list(&args[0]) {
        Ok(Some(list)) => Reply::Array(list.range(start, stop).into_iter().map(Reply::bulk).collect()),
        Ok(None) => Reply::Array(Vec::new()),
        Err(err) => Reply::from_err(err),
    }
}

/// LREM key count value — count > 0 from head, < 0 from tail, 0 removes
/// all occurrences.
pub fn lrem(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let count = match parse_int(&args[1]) {
        Ok(count) => count,
        Err(reply) => return reply,
    };
    match shared.keyspace.get_list(&args[0]) {
        Ok(Some(list)) => {
            let removed = list.remove(count, &args[2]);
            drop_if_empty(shared, &args[0], list.is_empty());
            Reply::Integer(removed as i64)
        }
        Ok(None) => Reply::Integer(0),
        Err(err) => Reply::from_err(err),
    }
}

pub fn ltrim(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let (start, stop) = match (parse_int(&args[1]), parse_int(&args[2])) {
        (Ok(start), Ok(stop)) => (start, stop),
        (Err(reply), _) | (_, Err(reply)) => return reply,
    };
    match shared.keyspace.get_list(&args[0]) {
        Ok(Some(list)) => {
            list.trim(start, stop);
            drop_if_empty(shared, &args[0], list.is_empty());
            Reply::ok()
        }
        Ok(None) => Reply::ok(),
        Err(err) => Reply::from_err(err),
    }
}
