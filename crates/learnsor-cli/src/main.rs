//! Learnsor CLI
//!
//! Main entry point for serving progressive hints to an editor integration.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use learnsor_session::{create_router, AppState, Config, DisclosureController};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 3000;

/// Learnsor - Progressive Hint Server
///
/// Serves hints about selected code in ordered levels (concept, approach,
/// code), unlocking each level only after time spent on the previous one.
#[derive(Parser, Debug)]
#[command(name = "learnsor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: learnsor.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Address to bind the HTTP API server to
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port for the HTTP API server
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Minimum time on a level before the next unlocks, in milliseconds
    #[arg(long, value_name = "MS")]
    dwell_ms: Option<u64>,

    /// Deadline for one worker invocation, in milliseconds
    #[arg(long, value_name = "MS")]
    deadline_ms: Option<u64>,

    /// Program used to launch the hint worker
    #[arg(long, value_name = "PROGRAM")]
    worker_program: Option<String>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Learnsor starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration, builds the controller and serves until Ctrl+C.
async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);

    // Re-validate after overrides
    config.validate()?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    print_config(&config);

    let worker = Arc::new(config.worker.process_worker());
    let controller = Arc::new(DisclosureController::from_config(&config, worker)?);
    let sweeper = tokio::spawn(sweep_idle_sessions(
        Arc::clone(&controller),
        config.session_idle(),
    ));
    let router = create_router(AppState::with_controller(controller));

    let addr = SocketAddr::new(args.host, args.port);
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("HTTP API server running on http://{addr}");
    println!("Event stream available at ws://{addr}/ws");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))?;

    sweeper.abort();
    tracing::info!("Learnsor stopped");
    Ok(())
}

/// Drops idle sessions every `idle` period, even when no new session is opened.
async fn sweep_idle_sessions(controller: Arc<DisclosureController>, idle: Duration) {
    let mut ticker = tokio::time::interval(idle);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let evicted = controller.evict_idle_sessions().await;
        tracing::debug!(evicted, "Idle session sweep");
    }
}

/// Resolves once Ctrl+C is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Applies command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(dwell_ms) = args.dwell_ms {
        config.dwell_ms = dwell_ms;
    }
    if let Some(deadline_ms) = args.deadline_ms {
        config.worker_deadline_ms = deadline_ms;
    }
    if let Some(ref program) = args.worker_program {
        config.worker.program.clone_from(program);
    }
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Dwell time: {}s", config.dwell().as_secs());
    println!("  Worker deadline: {}s", config.worker_deadline().as_secs());
    println!(
        "  Worker: {} {}",
        config.worker.program,
        config.worker.args.join(" ")
    );
    if let Some(ref fallback) = config.worker.fallback_program {
        println!("  Fallback worker: {fallback}");
    }
    let levels: Vec<_> = config.levels.iter().map(|level| level.id.as_str()).collect();
    println!("  Levels: {}", levels.join(" -> "));
}
