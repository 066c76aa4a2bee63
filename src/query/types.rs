//! Request and response types for the Flow Query Engine

use crate::store::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid address expression: {0}")]
    InvalidAddressExpression(String),

    #[error("invalid mask: {0}")]
    InvalidMask(String),

    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("invalid granularity: {0}")]
    InvalidGranularity(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueryError {
    /// Caller-side input error, as opposed to a store failure.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, QueryError::Store(_))
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(err: rusqlite::Error) -> Self {
        QueryError::Store(StoreError::Database(err))
    }
}

/// Reporting bucket width for `aggregate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    #[default]
    Hour,
    Day,
    Month,
}

impl Granularity {
    /// `strftime` template that truncates a timestamp to this granularity.
    pub(crate) fn truncation_format(&self) -> &'static str {
        match self {
            Granularity::Minute => "%Y-%m-%d %H:%M:00",
            Granularity::Hour => "%Y-%m-%d %H:00:00",
            Granularity::Day => "%Y-%m-%d 00:00:00",
            Granularity::Month => "%Y-%m-01 00:00:00",
        }
    }

    /// Absent or blank means hour.
    pub fn parse_optional(token: Option<&str>) -> Result<Self, QueryError> {
        match token.map(str::trim) {
            None | Some("") => Ok(Granularity::default()),
            Some(token) => token.parse(),
        }
    }
}

impl FromStr for Granularity {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" => Ok(Granularity::Minute),
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "month" => Ok(Granularity::Month),
            _ => Err(QueryError::InvalidGranularity(s.to_string())),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Month => "month",
        };
        f.write_str(name)
    }
}

/// Flow direction relative to the queried address or range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
    Internal,
    Mixed,
}

/// Raw search parameters as they arrive from the caller.
///
/// Kept as strings so pagination can be coerced and address/date errors
/// can be reported precisely.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub ip: Option<String>,
    pub mask: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

/// Raw aggregation parameters. `ip`/`mask` are only used by the
/// by-address variant.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregateRequest {
    pub ip: Option<String>,
    pub mask: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub granularity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub packets: i64,
    pub bytes: i64,
    pub direction: Direction,
    pub bytes_in: i64,
    pub bytes_out: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub flows: Vec<FlowRecord>,
    pub total_records: i64,
    pub total_bytes_in: i64,
    pub total_bytes_out: i64,
    pub total_traffic: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationBucket {
    pub time_period: DateTime<Utc>,
    pub total_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressAggregationBucket {
    pub time_period: DateTime<Utc>,
    pub bytes_in: i64,
    pub bytes_out: i64,
    pub total_bytes: i64,
}
