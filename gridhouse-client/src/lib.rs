//! # GridHouse Client
//!
//! Minimal, blocking RESP2 client. It exists to drive a server in tests
//! and scripts: typed helpers for the common commands plus a raw
//! `command` escape hatch for everything else.

mod client;
mod resp;

pub use client::{Client, ClientError, ClientResult, ClientTtl};
pub use resp::{encode_command, RespValue};
