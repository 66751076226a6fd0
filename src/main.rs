use clap::Parser;
use log::{error, info};
use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::sync::watch;

use copperhead_robot::config::{self, Config};
use copperhead_robot::debug_logger::DebugLogger;
use copperhead_robot::error::SessionError;
use copperhead_robot::session::Session;
use copperhead_robot::stats::StatsCounter;
use copperhead_robot::types::PlayerId;
use copperhead_robot::ws::WsConnector;

/// Exit status for configuration errors
const EXIT_CONFIG: i32 = 2;
/// Exit status when reconnect attempts run out
const EXIT_RETRIES: i32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "copperhead-robot",
    about = "Autonomous CopperHead snake player with adjustable difficulty"
)]
struct Args {
    /// WebSocket base URL; the player slot is appended (e.g. ws://localhost:8000/ws/)
    #[arg(long)]
    server: Option<String>,

    /// Skill level from 1 (weakest) to 10 (strongest)
    #[arg(long)]
    difficulty: Option<i64>,

    /// Path to Robot.toml (default: ./Robot.toml, falling back to built-in defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base seed for reproducible move choices
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many completed games
    #[arg(long)]
    max_games: Option<u32>,
}

fn load_config(args: &Args) -> Config {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).unwrap_or_else(|e| {
            error!("Invalid configuration in {}: {}", path.display(), e);
            process::exit(EXIT_CONFIG);
        }),
        None => Config::load_or_default(),
    };

    if let Some(server) = &args.server {
        config.server.endpoint = server.clone();
    }
    if let Some(difficulty) = args.difficulty {
        config.robot.difficulty = difficulty;
    }
    if args.seed.is_some() {
        config.robot.seed = args.seed;
    }
    if args.max_games.is_some() {
        config.robot.max_games = args.max_games;
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        process::exit(EXIT_CONFIG);
    }
    config
}

/// Logs the running tally at a fixed interval until the session ends
async fn report_stats(mut stats: watch::Receiver<StatsCounter>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => info!("Stats: {}", *stats.borrow()),
            changed = stats.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    // We default to 'info' level logging. But if the `RUST_LOG` environment variable is set,
    // we keep that value instead.
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }

    env_logger::init();

    let args = Args::parse();
    let config = load_config(&args);

    info!("Starting CopperHead robot...");

    let endpoint = match config::validate_endpoint(&config.server.endpoint) {
        Ok(url) => url,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(EXIT_CONFIG);
        }
    };
    let slots = config.server.player_slots.iter().copied().map(PlayerId).collect();
    let connector = WsConnector::new(
        endpoint,
        slots,
        Duration::from_millis(config.server.connect_timeout_ms),
    );

    let debug_logger = DebugLogger::new(config.debug.enabled, &config.debug.log_file_path).await;
    let report_every = Duration::from_secs(config.timing.stats_report_interval_secs.max(1));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut session = match Session::new(connector, config, shutdown_rx) {
        Ok(session) => session.with_debug_logger(debug_logger),
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(EXIT_CONFIG);
        }
    };

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });
    let reporter = tokio::spawn(report_stats(session.subscribe_stats(), report_every));

    let result = session.run().await;
    drop(session);
    let _ = reporter.await;

    match result {
        Ok(stats) => info!("Final stats: {}", stats),
        Err(e @ SessionError::RetriesExhausted { .. }) => {
            error!("{}", e);
            process::exit(EXIT_RETRIES);
        }
    }
}
