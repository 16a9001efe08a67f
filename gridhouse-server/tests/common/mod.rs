//! Test harness: run a server on its own runtime thread so blocking
//! clients can drive it from the test thread.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

use gridhouse_client::Client;
use gridhouse_server::{Config, Server};

pub struct ServerHandle {
    stop: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Graceful shutdown: persistence drains before the thread exits.
    pub fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            thread.join().expect("server thread");
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub fn config_for(dir: &Path) -> Config {
    Config::for_dir(dir)
}

/// Binds a server with the given config and serves until stopped.
pub fn spawn_server(config: Config) -> (SocketAddr, ServerHandle) {
    let (addr_tx, addr_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let thread = std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        runtime.block_on(async move {
            let server = Server::bind(config).await.expect("bind");
            addr_tx.send(server.local_addr().expect("addr")).expect("send addr");
            server
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await
                .expect("serve");
        });
    });

    let addr = addr_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("server did not start");
    (
        addr,
        ServerHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        },
    )
}

pub fn connect(addr: SocketAddr) -> Client {
    let client = Client::connect(("127.0.0.1", addr.port())).expect("connect");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    client
}

/// Polls `check` until it returns true or the deadline passes.
pub fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}
