//! Ferrolite server binary.
//!
//! Opens an engine (durable under PATH, or in memory) and serves it over TCP.

use std::path::PathBuf;

use clap::Parser;
use ferrolite_core::api::Engine;
use ferrolite_core::config::{EngineConfig, SyncMode};
use ferrolite_server::FerroliteServer;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ferrolite-server", version, about = "Local DynamoDB-compatible engine")]
struct Args {
    /// Storage directory for durable mode.
    #[arg(default_value = "./dynamo")]
    path: PathBuf,

    /// Keep all state in memory; PATH is ignored.
    #[arg(long, env = "FERROLITE_IN_MEMORY")]
    in_memory: bool,

    #[arg(long, env = "FERROLITE_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "FERROLITE_PORT", default_value_t = 4567)]
    port: u16,

    /// Simulated CREATING duration in milliseconds.
    #[arg(long = "create-table-ms", default_value_t = 0)]
    create_table_ms: u64,

    /// Simulated DELETING duration in milliseconds.
    #[arg(long = "delete-table-ms", default_value_t = 0)]
    delete_table_ms: u64,

    /// Simulated UPDATING duration in milliseconds.
    #[arg(long = "update-table-ms", default_value_t = 0)]
    update_table_ms: u64,

    /// How long a request waits for a contended key before failing.
    #[arg(long = "lock-timeout-ms", default_value_t = 5_000)]
    lock_timeout_ms: u64,

    /// Reject requests beyond the tables' provisioned throughput.
    #[arg(long)]
    enforce_throughput: bool,

    /// Skip fsync on log appends.
    #[arg(long)]
    no_sync: bool,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        let config = if self.in_memory {
            EngineConfig::in_memory()
        } else {
            EngineConfig::durable(&self.path)
        };
        config
            .with_table_delays(self.create_table_ms, self.delete_table_ms, self.update_table_ms)
            .with_lock_timeout(self.lock_timeout_ms)
            .with_enforce_throughput(self.enforce_throughput)
            .with_sync_mode(if self.no_sync { SyncMode::None } else { SyncMode::Full })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.engine_config();
    info!(storage = ?config.storage, host = %args.host, port = args.port, "starting");

    let engine = Engine::open(config)?;
    let server = match FerroliteServer::bind(engine, (args.host.as_str(), args.port)).await {
        Ok(server) => server,
        Err(e) => {
            error!(host = %args.host, port = args.port, error = %e, "failed to bind");
            return Err(e.into());
        }
    };
    server.run().await?;

    Ok(())
}
