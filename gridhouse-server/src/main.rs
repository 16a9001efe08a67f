//! GridHouse server binary: parse flags, wire up logging, serve.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gridhouse_server::{Config, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_logging(&config.log_level);

    let server = Server::bind(config).await?;
    tracing::info!(addr = %server.local_addr()?, "gridhouse listening");
    server.run().await?;
    Ok(())
}

fn init_logging(level: &str) {
    // "fatal" is accepted for compatibility and maps onto error.
    let level = match level {
        "fatal" => "error",
        other => other,
    };
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
