//! Ticket Cache Daemon
//!
//! Hosts the tiered cache with its admin API and runs periodic maintenance:
//! expired entries are purged and the tag index is pruned. The slow tier can
//! be restored from and saved to a snapshot across restarts.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ticket_cache::{
    AdminServer, AdminServerConfig, AdminState, CacheConfig, Diagnostics, Error, Invalidator,
    MemoryBackend, PersistentBackend, Result, StoreConfig, TieredCacheStore,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Ticket Cache - multi-layer caching engine daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "TICKET_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Admin API bind address
    #[arg(long, env = "ADMIN_ADDR", default_value = "0.0.0.0:8090")]
    admin_addr: String,

    /// Maintenance interval in seconds
    #[arg(long, env = "MAINTENANCE_INTERVAL", default_value = "60")]
    maintenance_interval_secs: u64,

    /// Slow tier snapshot file, overrides the configuration
    #[arg(long, env = "SNAPSHOT_PATH")]
    snapshot_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => CacheConfig::from_file(path)?,
        None => CacheConfig::default(),
    };
    if args.snapshot_path.is_some() {
        config.snapshot_path = args.snapshot_path.clone();
    }
    if args.maintenance_interval_secs == 0 {
        return Err(Error::Configuration(
            "maintenance interval must be greater than zero".to_string(),
        ));
    }

    info!("Starting Ticket Cache");
    info!("  Version: {}", ticket_cache::VERSION);
    info!("  Admin API: {}", args.admin_addr);
    info!("  Fast TTL ceiling: {}s", config.fast_ttl_ceiling_secs);
    info!("  Invalidation mode: {:?}", config.invalidation_mode);
    info!("  Maintenance interval: {}s", args.maintenance_interval_secs);

    // Tiers
    let fast = Arc::new(MemoryBackend::with_config(config.memory.clone()));
    let slow = Arc::new(PersistentBackend::with_config(config.persistent.clone()));
    if let Some(path) = &config.snapshot_path {
        restore_snapshot(&slow, path);
    }

    let store = Arc::new(TieredCacheStore::with_config(
        fast,
        slow.clone(),
        StoreConfig::from(&config),
    ));
    let invalidator = Arc::new(Invalidator::new(store.clone(), config.invalidation_mode));
    let diagnostics = Arc::new(Diagnostics::new(store.clone(), config.health.clone()));

    let cancel = CancellationToken::new();
    let events = tokio::spawn(log_events(store.clone(), cancel.clone()));
    let maintenance = tokio::spawn(run_maintenance(
        store.clone(),
        Duration::from_secs(args.maintenance_interval_secs),
        cancel.clone(),
    ));

    // Admin API
    let admin_config = AdminServerConfig {
        addr: args
            .admin_addr
            .parse()
            .map_err(|e| Error::Configuration(format!("Invalid admin API address: {}", e)))?,
    };
    let admin = AdminServer::new(
        admin_config,
        AdminState {
            store: store.clone(),
            invalidator,
            diagnostics,
        },
    );
    let admin_handle = admin.spawn();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    admin.shutdown();
    cancel.cancel();
    match admin_handle.await {
        Ok(Err(e)) => error!("Admin server stopped with error: {}", e),
        Err(e) => error!("Admin server task failed: {}", e),
        Ok(Ok(())) => {}
    }
    let _ = maintenance.await;
    let _ = events.await;

    if let Some(path) = &config.snapshot_path {
        match slow.save_snapshot(path) {
            Ok(entries) => info!(entries, path = %path.display(), "Slow tier saved"),
            Err(e) => error!(path = %path.display(), error = %e, "Failed to save slow tier snapshot"),
        }
    }

    info!("Ticket Cache shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=warn,tower_http=warn,axum=info",
            level.as_str().to_lowercase()
        ))
    });

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Background Tasks
// =============================================================================

fn restore_snapshot(slow: &PersistentBackend, path: &Path) {
    if !path.exists() {
        info!(path = %path.display(), "No slow tier snapshot, starting cold");
        return;
    }
    if let Err(e) = slow.load_snapshot(path) {
        warn!(path = %path.display(), error = %e, "Slow tier snapshot unreadable, starting cold");
    }
}

async fn run_maintenance(store: Arc<TieredCacheStore>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let purged = store.purge_expired().await;
                let pruned = store.prune_index().await;
                if purged > 0 || pruned > 0 {
                    info!(purged, pruned, "Maintenance pass completed");
                } else {
                    debug!("Maintenance pass found nothing to do");
                }
            }
        }
    }
    debug!("Maintenance loop stopped");
}

async fn log_events(store: Arc<TieredCacheStore>, cancel: CancellationToken) {
    let mut events = store.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => debug!(?event, "Cache event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Cache event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }
}
