//! # Flow Query Engine
//!
//! Read path over the flow store:
//! - `address`: address expression → `MatchStrategy` (CIDR, wildcard,
//!   known provisioned ranges, exact)
//! - `direction`: incoming / outgoing / internal / mixed and byte attribution
//! - `engine`: `search`, `aggregate`, `aggregate_by_address`

pub mod address;
pub mod direction;
pub mod engine;
pub mod types;

pub use address::{AddressExpression, MatchStrategy};
pub use direction::{attribute_bytes, infer_direction};
pub use engine::FlowQueryEngine;
pub use types::{
    AddressAggregationBucket, AggregateRequest, AggregationBucket, Direction, FlowRecord,
    Granularity, QueryError, SearchRequest, SearchResult,
};
