//! Flow Runtime
//!
//! - Opens the SQLite flow store and runs schema migrations
//! - Spawns the capture scan loop (nfdump → decode → 5-minute buckets)
//! - Serves the flow query API
//!
//! Usage:
//!   cargo run --release --bin flow_runtime
//!
//! Environment variables:
//!   NFLEDGER_DB_PATH - SQLite database path (default: /var/lib/nfledger/nfledger.db)
//!   NFCAPD_DIRECTORY - Capture directory (default: /var/cache/nfdump)
//!   NFCAPD_SCAN_INTERVAL_SECS - Scan interval (default: 300)
//!   NFLEDGER_HTTP_ADDR - Query API bind address (default: 0.0.0.0:8080)
//!   ENABLE_INGESTION - Run the scan loop (default: true)

use dotenv::dotenv;
use log::{error, info};
use nfledger::config::Config;
use nfledger::ingest::{run_ingestion_loop, IngestionCoordinator, NfdumpExtractor};
use nfledger::query::FlowQueryEngine;
use nfledger::store::{ConnectionRanges, FlowStore};
use nfledger::web;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Flow Runtime");

    let config = Config::from_env();
    let http_addr: SocketAddr = config.http_addr.parse()?;

    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Capture dir: {} (prefix '{}')", config.capture_dir, config.file_prefix);
    info!("   ├─ Scan interval: {}s", config.scan_interval_secs);
    info!("   ├─ nfdump: {} (timeout {}s)", config.nfdump_bin, config.nfdump_timeout_secs);
    info!("   └─ HTTP: {}", http_addr);

    // Initialize database
    info!("🔧 Initializing database...");
    let store = FlowStore::open(&config.db_path, config.busy_timeout())?;
    store.migrate(&config.schema_dir)?;
    info!("✅ Database initialized");

    let ingestion_task = if config.ingestion_enabled {
        let extractor = Arc::new(NfdumpExtractor::new(
            config.nfdump_bin.clone(),
            config.nfdump_timeout(),
        ));
        let coordinator = Arc::new(IngestionCoordinator::new(
            store.clone(),
            extractor,
            config.capture_dir.clone(),
            config.file_prefix.clone(),
        ));
        let scan_interval = config.scan_interval();
        info!("✅ Ingestion task spawned");
        Some(tokio::spawn(run_ingestion_loop(coordinator, scan_interval)))
    } else {
        info!("⚠️  Ingestion is DISABLED (set ENABLE_INGESTION=true to activate)");
        None
    };

    let ranges = Arc::new(ConnectionRanges::new(store.clone()));
    let engine = Arc::new(FlowQueryEngine::new(store, ranges, config.default_page_size));

    info!("🔄 Press CTRL+C to shutdown gracefully");

    let shutdown = web::shutdown_on(tokio::signal::ctrl_c());
    let served = web::serve(http_addr, engine, shutdown).await;

    // An aborted pass leaves its current file unmarked; the next start retries it
    if let Some(task) = ingestion_task {
        task.abort();
    }

    if let Err(e) = &served {
        error!("❌ HTTP server failed: {}", e);
    }
    served?;

    info!("✅ Flow runtime stopped");
    Ok(())
}
