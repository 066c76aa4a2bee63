//! Runtime configuration from environment variables

use std::env;
use std::time::Duration;

/// Configuration for the flow runtime
///
/// Loaded from environment variables with sensible defaults. Unparseable
/// numeric or boolean values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: String,

    /// Directory holding `*.sql` migrations
    pub schema_dir: String,

    /// Capture directory walked on every scan
    pub capture_dir: String,

    /// Only files whose name starts with this are ingested
    pub file_prefix: String,

    pub scan_interval_secs: u64,

    /// nfdump executable
    pub nfdump_bin: String,

    /// Process-level timeout for one nfdump run
    pub nfdump_timeout_secs: u64,

    pub http_addr: String,

    pub default_page_size: i64,

    /// Master enable flag for the scan loop
    pub ingestion_enabled: bool,

    pub busy_timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `NFLEDGER_DB_PATH` (default: /var/lib/nfledger/nfledger.db)
    /// - `NFLEDGER_SCHEMA_DIR` (default: sql)
    /// - `NFCAPD_DIRECTORY` (default: /var/cache/nfdump)
    /// - `NFCAPD_FILE_PREFIX` (default: nfcapd.)
    /// - `NFCAPD_SCAN_INTERVAL_SECS` (default: 300)
    /// - `NFDUMP_BIN` (default: nfdump)
    /// - `NFDUMP_TIMEOUT_SECS` (default: 120)
    /// - `NFLEDGER_HTTP_ADDR` (default: 0.0.0.0:8080)
    /// - `NFLEDGER_DEFAULT_PAGE_SIZE` (default: 25)
    /// - `ENABLE_INGESTION` (default: true)
    /// - `SQLITE_BUSY_TIMEOUT_MS` (default: 5000)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Self {
            db_path: text("NFLEDGER_DB_PATH", "/var/lib/nfledger/nfledger.db"),
            schema_dir: text("NFLEDGER_SCHEMA_DIR", "sql"),
            capture_dir: text("NFCAPD_DIRECTORY", "/var/cache/nfdump"),
            file_prefix: text("NFCAPD_FILE_PREFIX", "nfcapd."),

            scan_interval_secs: lookup("NFCAPD_SCAN_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(300),

            nfdump_bin: text("NFDUMP_BIN", "nfdump"),

            nfdump_timeout_secs: lookup("NFDUMP_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(120),

            http_addr: text("NFLEDGER_HTTP_ADDR", "0.0.0.0:8080"),

            default_page_size: lookup("NFLEDGER_DEFAULT_PAGE_SIZE")
                .and_then(|s| s.parse().ok())
                .filter(|size| *size > 0)
                .unwrap_or(25),

            ingestion_enabled: lookup("ENABLE_INGESTION")
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),

            busy_timeout_ms: lookup("SQLITE_BUSY_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(5_000),
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn nfdump_timeout(&self) -> Duration {
        Duration::from_secs(self.nfdump_timeout_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
