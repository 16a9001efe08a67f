//! # Connection Handler
//!
//! Purpose: Drive one client connection — parse, gate on AUTH, buffer
//! transactions, execute, and write batched replies — plus the PSYNC
//! takeover that turns a client connection into a replica session.
//!
//! ## Design Principles
//! 1. **One Task, One Connection**: Each connection is a single task;
//!    cross-task coordination happens through the shared keyspace and the
//!    persistence/replication channels.
//! 2. **Pipeline Batching**: After the first parsed command, parsing
//!    continues while buffered bytes remain; the batch gets one protected
//!    write+flush and one AOF blob.
//! 3. **Committed Before Replied**: Shard mutations are committed by the
//!    time a reply would be written, so dropping a connection mid-batch
//!    never leaves shared state inconsistent.

use std::sync::Arc;

use bytes::BytesMut;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use gridhouse_common::GridResult;

use crate::rdb;
use crate::resp::{self, encode_command, encode_reply, parse_request, Reply, Request};
use crate::server::Shared;
use crate::slave;

/// Write commands accumulated across one pipeline batch: a single AOF
/// blob plus the command count for the change counter.
#[derive(Default)]
struct WriteBatch {
    blob: Vec<u8>,
    count: u64,
}

/// Handles one accepted connection until it closes or errors.
pub async fn handle(shared: Arc<Shared>, stream: TcpStream, addr: std::net::SocketAddr) {
    tune_socket(&stream, &shared);
    let (reader, writer) = stream.into_split();
    let read_capacity = shared.config.read_buffer.max(4096);

    let mut conn = Connection {
        shared,
        reader,
        writer: Arc::new(Mutex::new(writer)),
        addr,
        buf: BytesMut::with_capacity(read_capacity),
        out: BytesMut::with_capacity(4096),
        authenticated: false,
        in_multi: false,
        queued: Vec::new(),
        is_replica: false,
    };
    conn.authenticated = conn.shared.config.requirepass.is_none();

    if let Err(err) = conn.run().await {
        debug!("connection {addr} ended: {err}");
    }
}

/// Disable Nagle, enable keepalive, and apply configured buffer sizes.
fn tune_socket(stream: &TcpStream, shared: &Shared) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_tcp_keepalive(&TcpKeepalive::new());
    if shared.config.read_buffer > 0 {
        let _ = sock.set_recv_buffer_size(shared.config.read_buffer);
    }
    if shared.config.write_buffer > 0 {
        let _ = sock.set_send_buffer_size(shared.config.write_buffer);
    }
}

struct Connection {
    shared: Arc<Shared>,
    reader: OwnedReadHalf,
    /// Write half behind a mutex so pipeline flushes serialize against
    /// the replica writer once PSYNC hands this connection over.
    writer: Arc<Mutex<OwnedWriteHalf>>,
    addr: std::net::SocketAddr,
    buf: BytesMut,
    out: BytesMut,
    authenticated: bool,
    in_multi: bool,
    queued: Vec<Request>,
    is_replica: bool,
}

impl Connection {
    async fn run(&mut self) -> GridResult<()> {
        loop {
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                break;
            }

            let mut batch = WriteBatch::default();
            self.out.clear();

            // Keep parsing while buffered bytes remain (pipelining); a
            // parse error becomes an inline error reply and parsing
            // resumes past the junk.
            loop {
                match parse_request(&mut self.buf) {
                    Ok(Some(request)) => self.execute(request, &mut batch).await?,
                    Ok(None) => break,
                    Err(err) => {
                        let reply = Reply::from_err(err);
                        encode_reply(&reply, &mut self.out);
                        resp::recover(&mut self.buf);
                    }
                }
            }

            self.flush().await?;
            self.commit_batch(&mut batch);
        }
        Ok(())
    }

    async fn execute(&mut self, request: Request, batch: &mut WriteBatch) -> GridResult<()> {
        // A replica link only carries REPLCONF acknowledgements after the
        // takeover; nothing may interleave with the command stream.
        if self.is_replica {
            return Ok(());
        }

        self.shared.stats.command_processed();
        let lower = request.name.to_ascii_lowercase();

        if !self.authenticated {
            let reply = if lower == "auth" {
                self.auth(&request.args)
            } else {
                Reply::error("NOAUTH Authentication required.")
            };
            self.push_reply(reply);
            return Ok(());
        }

        match lower.as_str() {
            "auth" => {
                let reply = self.auth(&request.args);
                self.push_reply(reply);
            }
            "multi" => {
                let reply = if self.in_multi {
                    Reply::error("ERR MULTI calls can not be nested")
                } else {
                    self.in_multi = true;
                    self.queued.clear();
                    Reply::ok()
                };
                self.push_reply(reply);
            }
            "exec" => {
                let reply = if self.in_multi {
                    self.in_multi = false;
                    let queued = std::mem::take(&mut self.queued);
                    let replies = queued
                        .iter()
                        .map(|queued_request| self.run_command(queued_request, batch))
                        .collect();
                    Reply::Array(replies)
                } else {
                    Reply::error("ERR EXEC without MULTI")
                };
                self.push_reply(reply);
            }
            "discard" => {
                let reply = if self.in_multi {
                    self.in_multi = false;
                    self.queued.clear();
                    Reply::ok()
                } else {
                    Reply::error("ERR DISCARD without MULTI")
                };
                self.push_reply(reply);
            }
            // In transaction mode every other command is queued verbatim.
            _ if self.in_multi => {
                self.queued.push(request);
                self.push_reply(Reply::Simple("QUEUED".to_string()));
            }
            "psync" => self.start_replica(true).await?,
            "sync" => self.start_replica(false).await?,
            "replicaof" | "slaveof" => {
                let reply = self.replicaof(&request.args);
                self.push_reply(reply);
            }
            _ => {
                let reply = self.run_command(&request, batch);
                self.push_reply(reply);
            }
        }
        Ok(())
    }

    /// Dispatches through the table and, for successful writes, feeds the
    /// AOF batch and the replica fan-out.
    fn run_command(&self, request: &Request, batch: &mut WriteBatch) -> Reply {
        let lower = request.name.to_ascii_lowercase();

        // FLUSHDB queues a log truncation; everything this batch has
        // collected must be appended ahead of it, or replay would
        // resurrect pre-flush writes.
        if lower == "flushdb" {
            self.commit_batch(batch);
        }

        let reply = self
            .shared
            .commands
            .dispatch(&self.shared, &request.name, &lower, &request.args);

        if let Some(spec) = self.shared.commands.get(lower.as_str()) {
            if !spec.read_only() && !reply.is_error() {
                self.propagate(&lower, request, &reply, batch);
            }
        }
        reply
    }

    fn propagate(&self, lower: &str, request: &Request, reply: &Reply, batch: &mut WriteBatch) {
        let Some(parts) = logged_form(lower, &request.args, reply) else {
            return;
        };
        let part_refs: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
        let mut encoded = Vec::new();
        encode_command(&part_refs, &mut encoded);

        batch.count += 1;
        batch.blob.extend_from_slice(&encoded);

        let replication = &self.shared.replication;
        if replication.is_master() && replication.replica_count() > 0 {
            replication.append_command(&encoded);
        }
    }

    /// Hands the accumulated write blob to the persistence manager and
    /// resets the batch.
    fn commit_batch(&self, batch: &mut WriteBatch) {
        if batch.count > 0 {
            let blob = std::mem::take(&mut batch.blob);
            self.shared.persistence.on_write(batch.count, blob);
            batch.count = 0;
        }
    }

    fn auth(&mut self, args: &[Vec<u8>]) -> Reply {
        let Some(expected) = &self.shared.config.requirepass else {
            return Reply::error("ERR Client sent AUTH, but no password is set");
        };
        if args.len() != 1 {
            return Reply::error("ERR wrong number of arguments for 'auth'");
        }
        if args[0] == expected.as_bytes() {
            self.authenticated = true;
            Reply::ok()
        } else {
            Reply::error("ERR invalid password")
        }
    }

    /// REPLICAOF host port | REPLICAOF NO ONE
    fn replicaof(&self, args: &[Vec<u8>]) -> Reply {
        if args.len() != 2 {
            return Reply::error("ERR wrong number of arguments for 'replicaof'");
        }
        if args[0].eq_ignore_ascii_case(b"no") && args[1].eq_ignore_ascii_case(b"one") {
            self.shared.replication.abort_slave_task();
            self.shared.replication.set_master();
            return Reply::ok();
        }

        let host = String::from_utf8_lossy(&args[0]).into_owned();
        let Some(port) = std::str::from_utf8(&args[1])
            .ok()
            .and_then(|text| text.parse::<u16>().ok())
        else {
            return Reply::error("ERR Invalid master port");
        };
        let master_addr = format!("{host}:{port}");

        self.shared.replication.set_slave(master_addr.clone());
        let handle = tokio::spawn(slave::run(self.shared.clone(), master_addr));
        self.shared.replication.store_slave_task(handle);
        Reply::ok()
    }

    /// PSYNC/SYNC takeover: reply FULLRESYNC (PSYNC only), stream the
    /// snapshot as a length-prefixed payload with no trailing CRLF (a
    /// known wire quirk), then register this connection as a replica.
    async fn start_replica(&mut self, announce: bool) -> GridResult<()> {
        // Preserve reply order for anything already batched.
        self.flush().await?;

        let payload = rdb::encode(&self.shared.keyspace);
        let offset = self.shared.replication.offset();

        let mut message = Vec::with_capacity(64 + payload.len());
        if announce {
            let header = format!(
                "+FULLRESYNC {} {}\r\n",
                self.shared.replication.run_id(),
                offset
            );
            message.extend_from_slice(header.as_bytes());
        }
        message.extend_from_slice(format!("${}\r\n", payload.len()).as_bytes());
        message.extend_from_slice(&payload);

        {
            let mut writer = self.writer.lock().await;
            writer.write_all(&message).await?;
            writer.flush().await?;
        }

        self.shared
            .replication
            .attach_replica(self.writer.clone(), self.addr.to_string());
        self.is_replica = true;
        Ok(())
    }

    fn push_reply(&mut self, reply: Reply) {
        if !self.is_replica {
            encode_reply(&reply, &mut self.out);
        }
    }

    async fn flush(&mut self) -> GridResult<()> {
        if self.out.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(&self.out).await?;
        writer.flush().await?;
        drop(writer);
        self.out.clear();
        Ok(())
    }
}

/// The command as it must appear in the log and on the replica stream.
/// Non-deterministic writes are rewritten into their observed effect;
/// `None` means there is no effect to record.
fn logged_form(lower: &str, args: &[Vec<u8>], reply: &Reply) -> Option<Vec<Vec<u8>>> {
    match lower {
        // SPOP picks a member in hash-iteration order, and each set hashes
        // with its own random seed; replaying SPOP verbatim pops a
        // different member. Record the removal that actually happened.
        "spop" => match reply {
            Reply::Bulk(member) => Some(vec![
                b"SREM".to_vec(),
                args.first()?.clone(),
                member.to_vec(),
            ]),
            _ => None,
        },
        // XADD with an auto id must record the id it generated, or replay
        // and replicas would mint fresh ones.
        "xadd" if args.get(1).map(Vec::as_slice) == Some(b"*".as_slice()) => match reply {
            Reply::Bulk(id) => {
                let mut parts = Vec::with_capacity(args.len() + 1);
                parts.push(b"XADD".to_vec());
                parts.push(args[0].clone());
                parts.push(id.to_vec());
                parts.extend(args[2..].iter().cloned());
                Some(parts)
            }
            _ => None,
        },
        _ => {
            let mut parts = Vec::with_capacity(args.len() + 1);
            parts.push(lower.to_ascii_uppercase().into_bytes());
            parts.extend(args.iter().cloned());
            Some(parts)
        }
    }
}
