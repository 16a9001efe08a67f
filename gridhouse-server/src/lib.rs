//! # GridHouse Server
//!
//! The server core: RESP request pipeline, command dispatch, append-only
//! log, snapshots, and master/replica replication, wired around the
//! sharded keyspace from `gridhouse-engine`.

pub mod aof;
pub mod commands;
pub mod config;
pub mod conn;
pub mod persistence;
pub mod rdb;
pub mod repl;
pub mod resp;
pub mod server;
pub mod slave;
pub mod stats;

pub use config::{Config, SyncPolicy};
pub use server::{Server, Shared};
