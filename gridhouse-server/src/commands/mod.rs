//! # Command Registry and Dispatch
//!
//! Purpose: Map command names to handlers with arity bounds and a
//! read-only flag; the flag drives AOF and replication propagation in the
//! connection layer.
//!
//! Handlers are pure with respect to the shared state: they touch the
//! keyspace, stats, persistence, and replication interfaces, never sockets.

mod apply;
mod generic;
mod hashes;
mod lists;
mod server_cmds;
mod sets;
mod streams;
mod strings;
mod zsets;

pub use apply::apply;
pub use server_cmds::render_info;

use ahash::RandomState;
use hashbrown::HashMap;

use crate::resp::Reply;
use crate::server::Shared;

/// Command handler: arguments exclude the command name.
pub type Handler = fn(&Shared, &[Vec<u8>]) -> Reply;

/// Registration record for one command.
pub struct CommandSpec {
    handler: Handler,
    min_args: usize,
    max_args: Option<usize>,
    read_only: bool,
}

impl CommandSpec {
    pub fn read_only(&self) -> bool {
        self.read_only
    }
}

/// Name (lowercased) to handler table.
pub struct CommandTable {
    map: HashMap<&'static str, CommandSpec, RandomState>,
}

impl Default for CommandTable {
    fn default() -> Self {
        CommandTable::new()
    }
}

impl CommandTable {
    pub fn new() -> Self {
        let mut table = CommandTable {
            map: HashMap::with_hasher(RandomState::new()),
        };

        // Connection and server commands.
        table.register("ping", server_cmds::ping, 0, Some(1), true);
        table.register("echo", server_cmds::echo, 1, Some(1), true);
        table.register("select", generic::select, 1, Some(1), true);
        table.register("info", server_cmds::info, 0, Some(1), true);
        table.register("bgsave", server_cmds::bgsave, 0, Some(0), true);
        table.register("save", server_cmds::save, 0, Some(0), true);
        table.register("replconf", server_cmds::replconf, 1, None, true);

        // Strings and counters.
        table.register("set", strings::set, 2, Some(4), false);
        table.register("get", strings::get, 1, Some(1), true);
        table.register("incr", strings::incr, 1, Some(1), false);
        table.register("decr", strings::decr, 1, Some(1), false);
        table.register("mset", strings::mset, 2, None, false);
        table.register("mget", strings::mget, 1, None, true);

        // Generic key management.
        table.register("del", generic::del, 1, None, false);
        table.register("exists", generic::exists, 1, None, true);
        table.register("keys", generic::keys, 1, Some(1), true);
        table.register("dbsize", generic::dbsize, 0, Some(0), true);
        // FLUSHDB also truncates the log itself; the connection layer
        // commits the pending write batch before dispatching it.
        table.register("flushdb", generic::flushdb, 0, Some(0), false);
        table.register("expire", generic::expire, 2, Some(2), false);
        table.register("pexpire", generic::pexpire, 2, Some(2), false);
        table.register("ttl", generic::ttl, 1, Some(1), true);
        table.register("pttl", generic::pttl, 1, Some(1), true);

        // Lists.
        table.register("lpush", lists::lpush, 2, None, false);
        table.register("rpush", lists::rpush, 2, None, false);
        table.register("lpop", lists::lpop, 1, Some(1), false);
        table.register("rpop", lists::rpop, 1, Some(1), false);
        table.register("lrange", lists::lrange, 3, Some(3), true);
        table.register("lrem", lists::lrem, 3, Some(3), false);
        table.register("ltrim", lists::ltrim, 3, Some(3), false);

        // Sets.
        table.register("sadd", sets::sadd, 2, None, false);
        table.register("srem", sets::srem, 2, None, false);
        table.register("smembers", sets::smembers, 1, Some(1), true);
        table.register("sismember", sets::sismember, 2, Some(2), true);
        table.register("spop", sets::spop, 1, Some(1), false);

        // Hashes.
        table.register("hset", hashes::hset, 3, None, false);
        table.register("hget", hashes::hget, 2, Some(2), true);
        table.register("hgetall", hashes::hgetall, 1, Some(1), true);
        table.register("hdel", hashes::hdel, 2, None, false);
        table.register("hincrby", hashes::hincrby, 3, Some(3), false);
        table.register("hincrbyfloat", hashes::hincrbyfloat, 3, Some(3), false);
        table.register("hkeys", hashes::hkeys, 1, Some(1), true);
        table.register("hvals", hashes::hvals, 1, Some(1), true);
        table.register("hlen", hashes::hlen, 1, Some(1), true);
        table.register("hexists", hashes::hexists, 2, Some(2), true);

        // Sorted sets.
        table.register("zadd", zsets::zadd, 3, None, false);
        table.register("zrange", zsets::zrange, 3, Some(4), true);
        table.register("zrem", zsets::zrem, 2, None, false);
        table.register("zscore", zsets::zscore, 2, Some(2), true);
        table.register("zcard", zsets::zcard, 1, Some(1), true);
        table.register("zpopmin", zsets::zpopmin, 1, Some(2), false);

        // Streams.
        table.register("xadd", streams::xadd, 4, None, false);
        table.register("xlen", streams::xlen, 1, Some(1), true);
        table.register("xrange", streams::xrange, 3, Some(5), true);
        table.register("xdel", streams::xdel, 2, None, false);
        table.register("xtrim", streams::xtrim, 3, Some(4), false);

        table
    }

    fn register(
        &mut self,
        name: &'static str,
        handler: Handler,
        min_args: usize,
        max_args: Option<usize>,
        read_only: bool,
    ) {
        self.map.insert(
            name,
            CommandSpec {
                handler,
                min_args,
                max_args,
                read_only,
            },
        );
    }

    pub fn get(&self, lower_name: &str) -> Option<&CommandSpec> {
        self.map.get(lower_name)
    }

    /// Runs a command, producing the unknown-command or arity error when it
    /// does not match the table. `display_name` keeps the client's casing
    /// for the unknown-command message.
    pub fn dispatch(
        &self,
        shared: &Shared,
        display_name: &str,
        lower_name: &str,
        args: &[Vec<u8>],
    ) -> Reply {
        let Some(spec) = self.map.get(lower_name) else {
            return Reply::error(format!("ERR unknown command '{display_name}'"));
        };
        if args.len() < spec.min_args || spec.max_args.is_some_and(|max| args.len() > max) {
            return Reply::error(format!("ERR wrong number of arguments for '{lower_name}'"));
        }
        (spec.handler)(shared, args)
    }
}

/// Parses a signed 64-bit integer argument, or the standard error reply.
pub(crate) fn parse_int(raw: &[u8]) -> Result<i64, Reply> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| Reply::error("ERR value is not an integer or out of range"))
}

/// Parses a finite float argument, or the standard error reply.
pub(crate) fn parse_float(raw: &[u8]) -> Result<f64, Reply> {
    let value: f64 = std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| Reply::error("ERR value is not a valid float"))?;
    if value.is_nan() {
        return Err(Reply::error("ERR value is not a valid float"));
    }
    Ok(value)
}

pub(crate) fn arg_eq(arg: &[u8], word: &str) -> bool {
    arg.eq_ignore_ascii_case(word.as_bytes())
}

/// Containers vanish with their last element, like Redis aggregates.
pub(crate) fn drop_if_empty(shared: &Shared, key: &[u8], now_empty: bool) {
    if now_empty {
        shared.keyspace.remove(key);
    }
}
