//! # TCP Server
//!
//! Accept RESP2 connections, admit them against the configured ceilings,
//! and run the background tasks (expiry sweep, AOF drain/fsync/rewrite,
//! snapshot timer, replication link) for the lifetime of the process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use gridhouse_common::GridResult;
use gridhouse_engine::{Keyspace, SweeperHandle};

use crate::commands::CommandTable;
use crate::config::Config;
use crate::conn;
use crate::persistence::PersistenceManager;
use crate::repl::ReplicationManager;
use crate::slave;
use crate::stats::ServerStats;

/// Hard bound on simultaneously admitted connections.
const MAX_CONNECTION_SLOTS: usize = 50_000;

/// Expiry sweep period.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// State shared by every connection task and command handler.
pub struct Shared {
    pub config: Config,
    pub keyspace: Arc<Keyspace>,
    pub commands: CommandTable,
    pub persistence: Arc<PersistenceManager>,
    pub replication: ReplicationManager,
    pub stats: ServerStats,
}

/// A bound server: listener plus its background tasks.
pub struct Server {
    shared: Arc<Shared>,
    listener: TcpListener,
    sweeper: Option<SweeperHandle>,
    tasks: Vec<JoinHandle<()>>,
    conn_slots: Arc<Semaphore>,
}

impl Server {
    /// Loads persisted state, binds the listener, and starts the
    /// background tasks. Any failure here is a startup failure.
    pub async fn bind(config: Config) -> GridResult<Server> {
        let keyspace = Arc::new(Keyspace::new());
        let persistence = Arc::new(PersistenceManager::new(&config)?);
        persistence.load(&keyspace);

        let listener = TcpListener::bind(config.listen_addr()).await?;

        let shared = Arc::new(Shared {
            config,
            keyspace: keyspace.clone(),
            commands: CommandTable::new(),
            persistence: persistence.clone(),
            replication: ReplicationManager::new(),
            stats: ServerStats::new(),
        });

        let tasks = persistence.spawn_tasks(keyspace.clone());
        let sweeper = keyspace.start_sweeper(SWEEP_INTERVAL);

        if let Some(master_addr) = shared.config.slaveof.clone() {
            shared.replication.set_slave(master_addr.clone());
            let handle = tokio::spawn(slave::run(shared.clone(), master_addr));
            shared.replication.store_slave_task(handle);
        }

        Ok(Server {
            shared,
            listener,
            sweeper: Some(sweeper),
            tasks,
            conn_slots: Arc::new(Semaphore::new(MAX_CONNECTION_SLOTS)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shared(&self) -> Arc<Shared> {
        self.shared.clone()
    }

    /// Serves until ctrl-c.
    pub async fn run(self) -> GridResult<()> {
        self.run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Serves until `shutdown` resolves, then drains persistence and
    /// stops the background tasks.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> GridResult<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.admit(stream, addr),
                        Err(err) => error!("accept failed: {err}"),
                    }
                }
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }
        self.shutdown().await;
        Ok(())
    }

    /// Admission: connection-count and memory ceilings, then a slot from
    /// the semaphore. A refused connection is closed immediately.
    fn admit(&self, stream: tokio::net::TcpStream, addr: std::net::SocketAddr) {
        let shared = self.shared.clone();

        if shared.config.max_clients > 0
            && shared.stats.connected_clients() >= shared.config.max_clients
        {
            warn!("refusing {addr}: connection ceiling reached");
            return;
        }
        if shared.config.max_memory > 0
            && shared.keyspace.approx_memory() as u64 >= shared.config.max_memory
        {
            warn!("refusing {addr}: memory ceiling reached");
            return;
        }
        let Ok(permit) = self.conn_slots.clone().try_acquire_owned() else {
            warn!("refusing {addr}: no connection slots");
            return;
        };

        shared.stats.connection_opened();
        tokio::spawn(async move {
            conn::handle(shared.clone(), stream, addr).await;
            shared.stats.connection_closed();
            drop(permit);
        });
    }

    /// Ordered teardown: drain + fsync the log and take the final
    /// snapshot while the background tasks still run, then stop them.
    async fn shutdown(mut self) {
        self.shared.persistence.shutdown(&self.shared.keyspace).await;
        for task in &self.tasks {
            task.abort();
        }
        if let Some(sweeper) = self.sweeper.take() {
            let _ = tokio::task::spawn_blocking(move || sweeper.stop()).await;
        }
        self.shared.replication.abort_slave_task();
        info!("server stopped");
    }
}
