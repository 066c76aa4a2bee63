//! # Capture-file ingestion
//!
//! Write path, one capture file at a time:
//!
//! ```text
//! capture dir walk (coordinator)
//!     ↓
//! FlowExtractor::extract()    nfdump text lines
//!     ↓
//! decoder::decode_lines()     FlowTuple per data line, bad lines skipped
//!     ↓
//! aggregator::aggregate_flows()  5-minute buckets, counters summed
//!     ↓
//! FlowStore::persist_file()   rows + ledger marker in one transaction
//! ```
//!
//! A file whose ledger marker exists is never aggregated again.

pub mod aggregator;
pub mod coordinator;
pub mod decoder;
pub mod extractor;
pub mod types;

pub use aggregator::aggregate_flows;
pub use coordinator::{run_ingestion_loop, FileOutcome, IngestError, IngestionCoordinator, PassSummary};
pub use decoder::{decode_line, decode_lines, DecodeError};
pub use extractor::{ExtractionError, FlowExtractor, NfdumpExtractor};
pub use types::{AggregationKey, FlowTuple, BUCKET_SECONDS};
