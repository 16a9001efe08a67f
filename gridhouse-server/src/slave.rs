//! # Replica Link
//!
//! Outbound side of replication: dial the master, run the handshake,
//! stream the full-resync snapshot into the local keyspace, then apply
//! the forwarded write stream in arrival order.
//!
//! There is no connect or handshake timeout; a failed link logs and the
//! task ends (REPLICAOF can be reissued).

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{error, info};

use gridhouse_common::{GridError, GridResult};

use crate::commands;
use crate::rdb;
use crate::resp::{encode_command, parse_request};
use crate::server::Shared;

/// Runs the replication link until it fails or is aborted.
pub async fn run(shared: Arc<Shared>, master_addr: String) {
    info!("replicating from {master_addr}");
    if let Err(err) = run_link(&shared, &master_addr).await {
        error!("replication link to {master_addr} failed: {err}");
    }
}

async fn run_link(shared: &Arc<Shared>, master_addr: &str) -> GridResult<()> {
    let mut stream = TcpStream::connect(master_addr).await?;
    stream.set_nodelay(true)?;
    let mut buf = BytesMut::with_capacity(64 * 1024);

    // Handshake: PING, our port, capabilities, then request a full resync.
    let port = shared.config.listen_port().to_string();
    send(&mut stream, &[b"PING"]).await?;
    expect_simple(&mut stream, &mut buf, "PONG").await?;
    send(&mut stream, &[b"REPLCONF", b"listening-port", port.as_bytes()]).await?;
    expect_simple(&mut stream, &mut buf, "OK").await?;
    send(&mut stream, &[b"REPLCONF", b"capability", b"eof"]).await?;
    expect_simple(&mut stream, &mut buf, "OK").await?;
    send(&mut stream, &[b"PSYNC", b"?", b"-1"]).await?;

    let resync = read_line(&mut stream, &mut buf).await?;
    let mut words = resync.split_whitespace();
    let offset = match (words.next(), words.next(), words.next()) {
        (Some("+FULLRESYNC"), Some(_run_id), Some(offset)) => offset
            .parse::<u64>()
            .map_err(|_| GridError::Handshake(format!("bad FULLRESYNC offset in {resync:?}")))?,
        _ => return Err(GridError::Handshake(format!("expected FULLRESYNC, got {resync:?}"))),
    };

    // Snapshot payload: `$<len>\r\n` then exactly len raw bytes with no
    // trailing CRLF.
    let header = read_line(&mut stream, &mut buf).await?;
    let len: usize = header
        .strip_prefix('$')
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| GridError::Handshake(format!("bad snapshot header {header:?}")))?;
    while buf.len() < len {
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(GridError::Handshake("master closed during snapshot".to_string()));
        }
    }
    let payload = buf.split_to(len);

    shared.keyspace.clear();
    let keys = rdb::load_bytes(&payload, &shared.keyspace)?;
    shared.replication.reset_applied(offset);
    info!(keys, offset, "full resync complete");

    // Apply forwarded writes in arrival order; the replication offset
    // advances by the encoded byte length of each command.
    loop {
        let before = buf.len();
        match parse_request(&mut buf) {
            Ok(Some(request)) => {
                let consumed = (before - buf.len()) as u64;
                commands::apply(&shared.keyspace, &request.name, &request.args);
                shared.replication.note_applied(consumed);
            }
            Ok(None) => {
                if stream.read_buf(&mut buf).await? == 0 {
                    info!("master closed the replication stream");
                    return Ok(());
                }
            }
            Err(err) => return Err(err),
        }
    }
}

async fn send(stream: &mut TcpStream, parts: &[&[u8]]) -> GridResult<()> {
    let mut out = Vec::new();
    encode_command(parts, &mut out);
    stream.write_all(&out).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one CRLF-terminated line, consuming it from the buffer.
async fn read_line(stream: &mut TcpStream, buf: &mut BytesMut) -> GridResult<String> {
    loop {
        if let Some(newline) = buf.iter().position(|&b| b == b'\n') {
            let line = buf.split_to(newline + 1);
            let end = if newline >= 1 && line[newline - 1] == b'\r' {
                newline - 1
            } else {
                newline
            };
            return Ok(String::from_utf8_lossy(&line[..end]).into_owned());
        }
        if stream.read_buf(buf).await? == 0 {
            return Err(GridError::Handshake("connection closed mid-line".to_string()));
        }
    }
}

async fn expect_simple(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    expected: &str,
) -> GridResult<()> {
    let line = read_line(stream, buf).await?;
    if line.strip_prefix('+') == Some(expected) {
        Ok(())
    } else {
        Err(GridError::Handshake(format!("expected +{expected}, got {line:?}")))
    }
}
