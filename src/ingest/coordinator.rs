//! Ingestion coordinator - per-file pipeline and the scan loop
//!
//! Per file:
//! `Discovered → (marked? skip) → Extracting → Decoding → Aggregating → Persisting → Marked`
//!
//! Failures are isolated per file. Extraction or persist failures leave the
//! file unmarked so the next pass retries it; sibling files in the same pass
//! are still processed.

use super::aggregator::aggregate_flows;
use super::decoder::decode_lines;
use super::extractor::{ExtractionError, FlowExtractor};
use crate::store::{FlowStore, StoreError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// nfcapd writes the open capture as `<prefix>current.<pid>` and renames it
/// when the rotation closes.
const IN_PROGRESS_MARKER: &str = "current";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("ledger lookup failed for {file}: {source}")]
    Ledger {
        file: String,
        #[source]
        source: StoreError,
    },

    #[error("persist failed for {file}: {source}")]
    PersistFailed {
        file: String,
        #[source]
        source: StoreError,
    },

    #[error("cannot walk capture directory {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What happened to a single capture file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    AlreadyProcessed,
    Ingested { raw_flows: usize, rows_written: usize },
}

/// Counters for one directory pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub files_seen: usize,
    pub already_processed: usize,
    pub ingested: usize,
    pub failed: usize,
    pub rows_written: usize,
}

pub struct IngestionCoordinator {
    store: FlowStore,
    extractor: Arc<dyn FlowExtractor>,
    capture_dir: PathBuf,
    file_prefix: String,
}

impl IngestionCoordinator {
    pub fn new(
        store: FlowStore,
        extractor: Arc<dyn FlowExtractor>,
        capture_dir: impl Into<PathBuf>,
        file_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            extractor,
            capture_dir: capture_dir.into(),
            file_prefix: file_prefix.into(),
        }
    }

    /// Walk the capture directory once and ingest every unmarked file.
    ///
    /// Never returns an error: a failed walk or a failed file is logged and
    /// counted, and the next pass tries again.
    pub async fn run_pass(&self) -> PassSummary {
        let mut summary = PassSummary::default();

        let files = match self.discover_files() {
            Ok(files) => files,
            Err(e) => {
                log::error!("❌ {}", e);
                return summary;
            }
        };

        for (path, file_name) in files {
            summary.files_seen += 1;

            match self.process_file(&path, &file_name).await {
                Ok(FileOutcome::AlreadyProcessed) => summary.already_processed += 1,
                Ok(FileOutcome::Ingested { raw_flows, rows_written }) => {
                    summary.ingested += 1;
                    summary.rows_written += rows_written;
                    log::info!(
                        "✅ {}: {} raw flows → {} buckets",
                        file_name,
                        raw_flows,
                        rows_written
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    log::error!("❌ {} left unmarked for retry: {}", path.display(), e);
                }
            }
        }

        summary
    }

    /// Run the full pipeline for one file.
    pub async fn process_file(&self, path: &Path, file_name: &str) -> Result<FileOutcome, IngestError> {
        let store = self.store.clone();
        let name = file_name.to_string();
        let processed = tokio::task::spawn_blocking(move || store.is_file_processed(&name))
            .await?
            .map_err(|source| IngestError::Ledger {
                file: file_name.to_string(),
                source,
            })?;

        if processed {
            return Ok(FileOutcome::AlreadyProcessed);
        }

        log::info!("📥 Processing new file: {}", path.display());

        let lines = self.extractor.extract(path).await?;
        let flows = decode_lines(&lines);
        let raw_flows = flows.len();
        let buckets = aggregate_flows(flows);

        log::debug!(
            "   ├─ {} lines, {} flows, {} buckets",
            lines.len(),
            raw_flows,
            buckets.len()
        );

        let store = self.store.clone();
        let name = file_name.to_string();
        let processed_at = chrono::Utc::now().timestamp();
        let rows_written =
            tokio::task::spawn_blocking(move || store.persist_file(&name, &buckets, processed_at))
                .await?
                .map_err(|source| IngestError::PersistFailed {
                    file: file_name.to_string(),
                    source,
                })?;

        Ok(FileOutcome::Ingested {
            raw_flows,
            rows_written,
        })
    }

    /// Every regular file under the capture directory (recursively) whose
    /// name starts with the capture prefix, sorted by path.
    fn discover_files(&self) -> Result<Vec<(PathBuf, String)>, IngestError> {
        let mut found = Vec::new();
        let mut pending = vec![self.capture_dir.clone()];
        let mut is_root = true;

        while let Some(dir) = pending.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(source) if is_root => {
                    return Err(IngestError::Walk { path: dir, source });
                }
                Err(e) => {
                    log::warn!("⚠️  Skipping unreadable directory {}: {}", dir.display(), e);
                    continue;
                }
            };
            is_root = false;

            for entry in entries.filter_map(|entry| entry.ok()) {
                let path = entry.path();
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };

                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    match name.strip_prefix(&self.file_prefix) {
                        Some(rest) if rest.starts_with(IN_PROGRESS_MARKER) => {
                            log::debug!("Skipping in-progress capture {}", path.display());
                        }
                        Some(_) => found.push((path, name)),
                        None => {}
                    }
                }
            }
        }

        found.sort();
        Ok(found)
    }
}

/// Scan loop: one pass per tick, never two passes at once.
///
/// The pass is awaited inside the loop and missed ticks are delayed rather
/// than bursted, so a slow pass simply pushes the next one back.
pub async fn run_ingestion_loop(coordinator: Arc<IngestionCoordinator>, scan_interval: Duration) {
    log::info!("⏰ Starting capture scan loop (interval: {:?})", scan_interval);

    let mut timer = interval(scan_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;

        log::info!("🔎 Scanning for new capture files...");
        let started = std::time::Instant::now();
        let summary = coordinator.run_pass().await;

        log::info!(
            "📊 Pass complete: {} seen, {} already processed, {} ingested, {} failed, {} rows | {}ms",
            summary.files_seen,
            summary.already_processed,
            summary.ingested,
            summary.failed,
            summary.rows_written,
            started.elapsed().as_millis()
        );
    }
}
