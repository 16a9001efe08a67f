//! # Blocking Client
//!
//! Purpose: A compact synchronous client over one TCP connection, with
//! typed helpers for the common commands and raw access for the rest.
//!
//! ## Design Principles
//! 1. **Borrow-Friendly API**: Accept `&[u8]` to avoid needless copies.
//! 2. **Fail Fast**: Protocol violations surface immediately as errors.
//! 3. **Raw Escape Hatch**: `command` and `send_raw`/`read_reply` let
//!    tests drive any verb, pipelines included.

use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;

use crate::resp::{encode_command, read_response, RespValue};

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.0))]
    Server(Vec<u8>),
    /// Reply type did not match the command's expected shape.
    #[error("unexpected response")]
    UnexpectedResponse,
}

/// TTL state returned by the server, mirroring the Redis sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

/// One blocking connection with reusable buffers.
pub struct Client {
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Client {
    /// Connects and disables Nagle; small request/reply exchanges should
    /// not wait on the segment timer.
    pub fn connect(addr: impl ToSocketAddrs) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Client {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        })
    }

    /// Bounds every read so a wedged server fails the test instead of
    /// hanging it.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> ClientResult<()> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    /// Sends one command and reads one reply.
    pub fn command(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_response(&mut self.reader, &mut self.line_buf)
    }

    /// Writes raw bytes without framing; pair with `read_reply`.
    pub fn send_raw(&mut self, bytes: &[u8]) -> ClientResult<()> {
        let stream = self.reader.get_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    /// Reads one reply; use after `send_raw` pipelines.
    pub fn read_reply(&mut self) -> ClientResult<RespValue> {
        read_response(&mut self.reader, &mut self.line_buf)
    }

    /// Fetches a value by key; `Ok(None)` when the key is missing.
    pub fn get(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.command(&[b"GET", key])? {
            RespValue::Bulk(data) => Ok(data),
            RespValue::Error(message) => Err(ClientError::Server(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a value without expiration.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        match self.command(&[b"SET", key, value])? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(ClientError::Server(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a value with a TTL in seconds.
    pub fn set_ex(&mut self, key: &[u8], value: &[u8], ttl: Duration) -> ClientResult<()> {
        let seconds = ttl.as_secs().to_string();
        match self.command(&[b"SET", key, value, b"EX", seconds.as_bytes()])? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(ClientError::Server(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Deletes a key; true when something was removed.
    pub fn del(&mut self, key: &[u8]) -> ClientResult<bool> {
        match self.command(&[b"DEL", key])? {
            RespValue::Integer(count) => Ok(count > 0),
            RespValue::Error(message) => Err(ClientError::Server(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a TTL on a key; true when the TTL was applied.
    pub fn expire(&mut self, key: &[u8], ttl: Duration) -> ClientResult<bool> {
        let seconds = ttl.as_secs().to_string();
        match self.command(&[b"EXPIRE", key, seconds.as_bytes()])? {
            RespValue::Integer(applied) => Ok(applied == 1),
            RespValue::Error(message) => Err(ClientError::Server(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Reports TTL state for a key.
    pub fn ttl(&mut self, key: &[u8]) -> ClientResult<ClientTtl> {
        match self.command(&[b"TTL", key])? {
            RespValue::Integer(-2) => Ok(ClientTtl::Missing),
            RespValue::Integer(-1) => Ok(ClientTtl::NoExpiry),
            RespValue::Integer(secs) if secs >= 0 => {
                Ok(ClientTtl::ExpiresIn(Duration::from_secs(secs as u64)))
            }
            RespValue::Error(message) => Err(ClientError::Server(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Pings the server, returning the raw payload.
    pub fn ping(&mut self) -> ClientResult<Vec<u8>> {
        match self.command(&[b"PING"])? {
            RespValue::Simple(text) => Ok(text),
            RespValue::Bulk(Some(data)) => Ok(data),
            RespValue::Error(message) => Err(ClientError::Server(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Fetches the INFO report.
    pub fn info(&mut self) -> ClientResult<Vec<u8>> {
        match self.command(&[b"INFO"])? {
            RespValue::Bulk(Some(data)) => Ok(data),
            RespValue::Error(message) => Err(ClientError::Server(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}
