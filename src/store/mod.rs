//! Flow Store: persisted flows, the processed-file ledger, and the
//! read-only provisioned-range lookup.

pub mod db;
pub mod ranges;

pub use db::{run_schema_migrations, FlowStore, StoreError};
pub use ranges::{ConnectionRanges, RangeLookup};
