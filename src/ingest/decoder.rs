//! Flow record decoder for nfdump `fmt:` output lines
//!
//! Expected field order (comma separated):
//! `%ts,%sa,%da,%sp,%dp,%pr,%pkt,%byt`
//!
//! Header, summary and blank lines yield `Ok(None)`. Malformed lines yield a
//! `DecodeError` which the caller logs and skips; one bad line never stops
//! the rest of the file from being decoded.

use super::types::FlowTuple;
use chrono::NaiveDateTime;
use thiserror::Error;

pub const FIELD_DELIMITER: char = ',';
pub const FIELD_COUNT: usize = 8;
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Line prefixes nfdump emits around the data rows.
const NON_DATA_PREFIXES: [&str; 5] = ["Summary", "Time", "Total", "Sys:", "Date"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected 8 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("invalid protocol '{0}'")]
    InvalidProtocol(String),
}

/// Decode one line of extractor output.
pub fn decode_line(line: &str) -> Result<Option<FlowTuple>, DecodeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || NON_DATA_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
        return Ok(None);
    }

    let fields: Vec<&str> = trimmed.split(FIELD_DELIMITER).map(str::trim).collect();
    if fields.len() != FIELD_COUNT {
        return Err(DecodeError::FieldCount(fields.len()));
    }

    let timestamp = NaiveDateTime::parse_from_str(fields[0], TIMESTAMP_FORMAT)
        .map_err(|_| DecodeError::InvalidTimestamp(fields[0].to_string()))?
        .and_utc()
        .timestamp();

    let protocol = protocol_number(fields[5])?;

    Ok(Some(FlowTuple {
        timestamp,
        src_ip: fields[1].to_string(),
        dst_ip: fields[2].to_string(),
        src_port: fields[3].parse().unwrap_or(0),
        dst_port: fields[4].parse().unwrap_or(0),
        protocol,
        packets: parse_counter(fields[6]),
        bytes: parse_counter(fields[7]),
    }))
}

/// Unsigned counter, stored as i64. Negative or unparseable text is 0;
/// values past `i64::MAX` are clamped.
fn parse_counter(field: &str) -> i64 {
    field
        .parse::<u64>()
        .map(|n| i64::try_from(n).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Decode a whole extraction, skipping (and logging) malformed lines.
pub fn decode_lines<I, S>(lines: I) -> Vec<FlowTuple>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut flows = Vec::new();
    let mut skipped = 0usize;

    for line in lines {
        let line = line.as_ref();
        match decode_line(line) {
            Ok(Some(flow)) => flows.push(flow),
            Ok(None) => {}
            Err(e) => {
                skipped += 1;
                log::debug!("⚠️  Skipping line ({}): {}", e, line);
            }
        }
    }

    if skipped > 0 {
        log::warn!("⚠️  Skipped {} malformed lines", skipped);
    }

    flows
}

/// Map a protocol mnemonic or numeric string to its IANA number.
pub fn protocol_number(proto: &str) -> Result<u8, DecodeError> {
    match proto.to_ascii_uppercase().as_str() {
        "ICMP" => Ok(1),
        "TCP" => Ok(6),
        "UDP" => Ok(17),
        "GRE" => Ok(47),
        "ESP" => Ok(50),
        "ICMP6" => Ok(58),
        _ => proto
            .parse::<u8>()
            .map_err(|_| DecodeError::InvalidProtocol(proto.to_string())),
    }
}
