//! SQLite flow store
//!
//! Owns the `flows` table, the `processed_files` ledger and the connection
//! setup shared by the ingestion and query paths:
//! - one writer connection (WAL) behind a mutex, used by ingestion
//! - a fresh read-only connection per query, so reads never wait on a
//!   running ingestion transaction
//! - a busy timeout on every connection
//! - `inet_contains(network, address)` scalar function for CIDR matching
//! - idempotent schema migrations from `sql/*.sql`

use crate::ingest::types::FlowTuple;
use ip_network::IpNetwork;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("schema directory not found: {0}")]
    SchemaDirMissing(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run schema migrations from SQL files
///
/// Reads every `.sql` file in `schema_dir`, sorted by file name
/// (`01_`, `02_`, ...), and executes it. All statements must use
/// `IF NOT EXISTS` so the loader can run on every start.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: impl AsRef<Path>) -> Result<(), StoreError> {
    let schema_path = schema_dir.as_ref();

    if !schema_path.exists() {
        return Err(StoreError::SchemaDirMissing(schema_path.to_path_buf()));
    }

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_path.display());

    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().to_string();

        log::info!("   ├─ Executing: {}", filename);
        let sql_content = fs::read_to_string(&path)?;
        conn.execute_batch(&sql_content)?;
    }

    log::info!("✅ All schema migrations completed successfully");

    Ok(())
}

/// Setup shared by writer and reader handles.
fn configure_connection(conn: &Connection, busy_timeout: Duration) -> Result<(), StoreError> {
    conn.busy_timeout(busy_timeout)?;
    register_inet_contains(conn)?;
    Ok(())
}

/// Register `inet_contains(network TEXT, address TEXT) -> BOOLEAN`.
///
/// The network argument is parsed once per statement and cached as
/// auxiliary data. Unparseable addresses never match.
fn register_inet_contains(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "inet_contains",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let network = ctx.get_or_create_aux(0, |value| -> Result<IpNetwork, BoxError> {
                let text = value.as_str()?;
                text.parse::<IpNetwork>()
                    .map_err(|e| format!("invalid network '{}': {:?}", text, e).into())
            })?;

            let address: Option<String> = ctx.get(1)?;
            Ok(address
                .and_then(|a| a.trim().parse::<IpAddr>().ok())
                .map(|ip| network.contains(ip))
                .unwrap_or(false))
        },
    )
}

/// Shared handle to the flow database.
///
/// Cloning is cheap; all clones share one writer connection behind a mutex.
#[derive(Clone)]
pub struct FlowStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl FlowStore {
    /// Open (or create) the database at `db_path` and apply connection setup.
    ///
    /// Does NOT run migrations; call `migrate` once at startup.
    pub fn open(db_path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        configure_connection(&conn, busy_timeout)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
            busy_timeout,
        })
    }

    /// Open a read-only connection for one query.
    ///
    /// Under WAL a reader sees the last committed state and is not blocked
    /// by an open write transaction on the writer connection.
    pub fn open_reader(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.db_path)?;
        configure_connection(&conn, self.busy_timeout)?;
        conn.pragma_update(None, "query_only", "ON")?;
        Ok(conn)
    }

    pub fn migrate(&self, schema_dir: impl AsRef<Path>) -> Result<(), StoreError> {
        let mut conn = self.lock();
        run_schema_migrations(&mut conn, schema_dir)
    }

    /// Lock the writer connection. A poisoned lock is recovered: the connection
    /// itself is still consistent because every write runs in a transaction.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a ledger marker exists for `file_name`.
    pub fn is_file_processed(&self, file_name: &str) -> Result<bool, StoreError> {
        let conn = self.lock();
        let exists = conn
            .query_row(
                "SELECT 1 FROM processed_files WHERE file_name = ?1",
                [file_name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    /// Persist one file's aggregated flows and its ledger marker atomically.
    ///
    /// Either every row plus the marker commits, or nothing does. A marker
    /// that already exists violates the UNIQUE constraint and rolls the
    /// whole batch back.
    pub fn persist_file(
        &self,
        file_name: &str,
        flows: &[FlowTuple],
        processed_at: i64,
    ) -> Result<usize, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO flows (
                    timestamp, src_ip, dst_ip, src_port, dst_port, protocol, packets, bytes
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;

            for flow in flows {
                stmt.execute(params![
                    flow.timestamp,
                    flow.src_ip,
                    flow.dst_ip,
                    flow.src_port,
                    flow.dst_port,
                    flow.protocol,
                    flow.packets,
                    flow.bytes,
                ])?;
            }
        }

        tx.execute(
            "INSERT INTO processed_files (file_name, processed_at) VALUES (?1, ?2)",
            params![file_name, processed_at],
        )?;

        // Dropping `tx` on any early return above rolls back.
        tx.commit()?;

        Ok(flows.len())
    }
}
