// rollcall entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config
// 3. Open the aggregate store and replay the flat files
// 4. Create channels and the bridge-backed chat platform
// 5. Bind and spawn the bridge
// 6. Run the event loop until Ctrl+C or the bridge stops
// 7. Final flush on exit

use std::sync::Arc;

use anyhow::Context;
use rollcall_app::app::{self, App};
use rollcall_app::bridge::{self, BridgePlatform};
use rollcall_app::config;
use rollcall_core::{AggregateStore, LiveVoteRegistry, StorePaths};
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("rollcall starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "config loaded: command {}{}, bridge port {}, data in {}",
        config.commands.prefix, config.commands.name, config.bridge.port, config.storage.data_dir
    );

    // 3. Open the store
    let store = Arc::new(AggregateStore::open(StorePaths::in_dir(
        &config.storage.data_dir,
    )));
    let registry = Arc::new(LiveVoteRegistry::new());
    info!("live votes are kept in memory only; vote messages from before this start are ignored");

    // 4. Channels and platform
    let (event_tx, event_rx) = mpsc::channel(256);
    let (action_tx, action_rx) = mpsc::channel(256);
    let platform = Arc::new(BridgePlatform::new(
        action_tx,
        config.bridge.action_timeout(),
    ));

    // 5. Bridge
    let listener = bridge::bind(config.bridge.port).await?;
    let bridge_handle = tokio::spawn(async move {
        if let Err(e) = bridge::run(listener, event_tx, action_rx).await {
            error!("bridge error: {e}");
        }
    });

    // 6. Event loop
    let app = App::new(&config, Arc::clone(&store), Arc::clone(&registry), platform);
    if let Err(e) = app::run(event_rx, shutdown_signal(), app).await {
        error!("application loop error: {e}");
    }
    bridge_handle.abort();

    // 7. Final flush
    store
        .flush_to_disk()
        .context("final flush of the aggregate store failed")?;
    info!(open_live_votes = registry.open_count(), "rollcall shut down cleanly");
    Ok(())
}

/// Resolves on Ctrl+C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}

/// Initialize tracing to log to `logs/rollcall.log`.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("rollcall.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("rollcall=info,rollcall_app=info,rollcall_core=info,warn")
        }))
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
