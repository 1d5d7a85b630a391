//! Coordinator server binary

use clap::Parser;
use pact_coordinator::{
    http, Coordinator, CoordinatorConfig, DecisionLog, HttpTransport, ParticipantRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pact-coordinator")]
#[command(about = "Two-phase commit coordinator server")]
struct Args {
    /// Listen port
    #[arg(short, long, default_value = "50050")]
    port: u16,

    /// Listen host
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Directory for the durable decision log
    #[arg(long, default_value = "./pact-data/coordinator")]
    data_dir: PathBuf,

    /// Default transaction timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_s: u64,

    /// Per-call RPC timeout in seconds
    #[arg(long, default_value = "10")]
    rpc_timeout_s: u64,

    /// Static registrations, as repeated id=endpoint pairs
    #[arg(long = "participant", value_name = "ID=ENDPOINT")]
    participants: Vec<String>,

    /// Logging level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(log_level).init();

    let mut config = CoordinatorConfig::new(args.data_dir.clone());
    config.txn_timeout = Duration::from_secs(args.timeout_s);
    config.rpc_timeout = Duration::from_secs(args.rpc_timeout_s);

    let registry = Arc::new(ParticipantRegistry::new());
    for entry in &args.participants {
        match entry.split_once('=') {
            Some((id, endpoint)) => registry.register(id, endpoint),
            None => warn!(
                "ignoring malformed --participant {:?} (expected id=endpoint)",
                entry
            ),
        }
    }

    let log = DecisionLog::open(&config.data_dir)?;
    let coordinator = Arc::new(Coordinator::new(
        config,
        registry,
        Arc::new(HttpTransport::new()),
        log,
    ));

    // Resume undelivered decisions and abort what was in flight at the crash
    coordinator.recover().await?;

    let addr = format!("{}:{}", args.host, args.port);
    info!("starting coordinator on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, http::router(coordinator)).await?;

    Ok(())
}
