//! nfledger: NetFlow capture ingestion and flow queries over SQLite
//!
//! - `ingest`: nfdump extraction, decoding, 5-minute aggregation, and the
//!   scan loop with its processed-file ledger
//! - `store`: the SQLite flow store
//! - `query`: address-matched search and time-bucketed aggregation
//! - `web`: HTTP surface over `query`

pub mod config;
pub mod ingest;
pub mod query;
pub mod store;
pub mod web;
