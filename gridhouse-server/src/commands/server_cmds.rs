//! Server introspection and persistence commands: PING/ECHO, INFO,
//! BGSAVE/SAVE, and the REPLCONF acknowledgements.

use std::fmt::Write as _;

use crate::resp::Reply;
use crate::server::Shared;

/// Version string reported by INFO for client compatibility probes.
const COMPAT_VERSION: &str = "7.0.0-gridhouse";

pub fn ping(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let _ = shared;
    match args.first() {
        None => Reply::Simple("PONG".to_string()),
        Some(payload) => Reply::bulk(payload.clone()),
    }
}

pub fn echo(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let _ = shared;
    Reply::bulk(args[0].clone())
}

pub fn info(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let _ = args;
    Reply::bulk(render_info(shared).into_bytes())
}

/// Spawns a background snapshot and returns immediately.
pub fn bgsave(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let _ = args;
    if shared.persistence.bgsave(shared.keyspace.clone()) {
        Reply::Simple("Background saving started".to_string())
    } else {
        Reply::error("ERR Background save already in progress")
    }
}

/// Blocks until the snapshot is on disk.
pub fn save(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let _ = args;
    match shared.persistence.save_now(&shared.keyspace) {
        Ok(()) => Reply::ok(),
        Err(err) => Reply::error(format!("ERR {err}")),
    }
}

/// REPLCONF subcommands are acknowledged with OK; GETACK reports the
/// replication offset as a bulk string.
pub fn replconf(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    if args[0].eq_ignore_ascii_case(b"getack") {
        let offset = shared.replication.offset();
        return Reply::bulk(offset.to_string().into_bytes());
    }
    Reply::ok()
}

/// Multi-section INFO report.
pub fn render_info(shared: &Shared) -> String {
    let stats = &shared.stats;
    let persistence = &shared.persistence;
    let replication = &shared.replication;

    let mut out = String::with_capacity(512);
    let _ = write!(
        out,
        "# Server\r\n\
         redis_version:{version}\r\n\
         os:{os}\r\n\
         tcp_port:{port}\r\n\
         uptime_in_seconds:{uptime}\r\n\
         \r\n\
         # Clients\r\n\
         connected_clients:{clients}\r\n\
         \r\n\
         # Memory\r\n\
         used_memory:{memory}\r\n\
         \r\n\
         # Stats\r\n\
         total_connections_received:{connections}\r\n\
         total_commands_processed:{commands}\r\n\
         keyspace_hits:{hits}\r\n\
         keyspace_misses:{misses}\r\n\
         \r\n\
         # Persistence\r\n\
         aof_enabled:{aof_enabled}\r\n\
         aof_last_rewrite_time_sec:{aof_rewrite_sec}\r\n\
         aof_current_size:{aof_size}\r\n\
         rdb_changes_since_last_save:{changes}\r\n\
         \r\n\
         # Replication\r\n\
         role:{role}\r\n\
         connected_slaves:{slaves}\r\n\
         master_replid:{replid}\r\n\
         master_repl_offset:{offset}\r\n",
        version = COMPAT_VERSION,
        os = std::env::consts::OS,
        port = shared.config.listen_port(),
        uptime = stats.uptime_secs(),
        clients = stats.connected_clients(),
        memory = shared.keyspace.approx_memory(),
        connections = stats.connections_received(),
        commands = stats.commands_processed(),
        hits = stats.keyspace_hits(),
        misses = stats.keyspace_misses(),
        aof_enabled = persistence.aof_enabled() as u8,
        aof_rewrite_sec = persistence.aof_last_rewrite_time_sec(),
        aof_size = persistence.aof_current_size(),
        changes = persistence.changes_since_last_save(),
        role = replication.role_name(),
        slaves = replication.replica_count(),
        replid = replication.run_id(),
        offset = replication.offset(),
    );
    out
}
