//! Set commands.

use crate::commands::drop_if_empty;
use crate::resp::Reply;
use crate::server::Shared;

pub fn sadd(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let set = match shared.keyspace.get_or_create_set(&args[0]) {
        Ok(set) => set,
        Err(err) => return Reply::from_err(err),
    };
    let added = args[1..]
        .iter()
        .filter(|member| set.add(member.to_vec()))
        .count();
    Reply::Integer(added as i64)
}

pub fn srem(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_set(&args[0]) {
        Ok(Some(set)) => {
            let removed = args[1..]
                .iter()
                .filter(|member| set.remove(member.as_slice()))
                .count();
            drop_if_empty(shared, &args[0], set.is_empty());
            Reply::Integer(removed as i64)
        }
        Ok(None) => Reply::Integer(0),
        Err(err) => Reply::from_err(err),
    }
}

pub fn smembers(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_set(&args[0]) {
        Ok(Some(set)) => Reply::Array(set.members().into_iter().map(Reply::bulk).collect()),
        Ok(None) => Reply::Array(Vec::new()),
        Err(err) => Reply::from_err(err),
    }
}

pub fn sismember(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_set(&args[0]) {
        Ok(Some(set)) => Reply::Integer(set.contains(&args[1]) as i64),
        Ok(None) => Reply::Integer(0),
        Err(err) => Reply::from_err(err),
    }
}

/// SPOP key — removes one member in iteration order.
pub fn spop(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    match shared.keyspace.get_set(&args[0]) {
        Ok(Some(set)) => {
            let popped = set.pop();
            drop_if_empty(shared, &args[0], set.is_empty());
            popped.map(Reply::bulk).unwrap_or(Reply::Nil)
        }
        Ok(None) => Reply::Nil,
        Err(err) => Reply::from_err(err),
    }
}
