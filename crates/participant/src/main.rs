//! Participant server binary

use clap::Parser;
use pact_participant::{http, recovery, ParticipantConfig, ParticipantEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pact-participant")]
#[command(about = "Two-phase commit participant server")]
struct Args {
    /// Participant identity, as registered with the coordinator
    #[arg(long)]
    id: String,

    /// Listen port
    #[arg(short, long, default_value = "50051")]
    port: u16,

    /// Listen host
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Directory for the durable store and prepared journal
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Coordinator endpoint for the post-restart decision inquiry
    #[arg(long)]
    coordinator: Option<String>,

    /// Seconds an unprepared transaction may wait before being aborted
    #[arg(long, default_value = "30")]
    prepare_timeout_s: u64,

    /// Seconds to wait after restart before inquiring for decisions
    #[arg(long, default_value = "30")]
    recovery_timeout_s: u64,

    /// Initial resources, as repeated key=value pairs
    #[arg(long = "seed", value_name = "KEY=VALUE")]
    seeds: Vec<String>,

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

    let data_dir = args
        .data_dir
        .unwrap_or_else(|| PathBuf::from(format!("./pact-data/{}", args.id)));

    let mut config = ParticipantConfig::new(args.id.clone(), data_dir);
    config.prepare_timeout = Duration::from_secs(args.prepare_timeout_s);
    config.recovery_timeout = Duration::from_secs(args.recovery_timeout_s);
    config.coordinator = args.coordinator.clone();

    let engine = Arc::new(ParticipantEngine::open(config)?);

    for seed in &args.seeds {
        match seed.split_once('=') {
            Some((key, value)) => engine.seed(key, value)?,
            None => warn!("ignoring malformed --seed {:?} (expected key=value)", seed),
        }
    }

    // Abort transactions that never reached prepare in time
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let sweeper = engine.clone();
                let swept = tokio::task::spawn_blocking(move || sweeper.sweep_expired()).await;
                match swept {
                    Ok(Ok(n)) if n > 0 => info!("swept {} expired transactions", n),
                    Ok(Err(e)) => warn!("sweep failed: {}", e),
                    _ => {}
                }
            }
        });
    }

    if let Some(coordinator) = engine.config().coordinator.clone() {
        recovery::spawn_inquiry(
            engine.clone(),
            coordinator,
            engine.config().recovery_timeout,
        );
    }

    let addr = format!("{}:{}", args.host, args.port);
    info!("starting participant {} on {}", args.id, addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, http::router(engine)).await?;

    Ok(())
}
