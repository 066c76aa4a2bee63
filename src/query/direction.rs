//! Direction inference and byte attribution
//!
//! | src hit | dst hit | range target | direction | in / out        |
//! |---------|---------|--------------|-----------|-----------------|
//! | yes     | no      | any          | outgoing  | 0 / bytes       |
//! | no      | yes     | any          | incoming  | bytes / 0       |
//! | yes     | yes     | yes          | internal  | bytes/2 each    |
//! | other   |         |              | mixed     | bytes/2 each    |
//!
//! Halving floors, so an odd byte count loses one byte across in+out.
//! The SQL expressions below encode the same table for store-side totals.

use super::types::Direction;

pub fn infer_direction(src_hit: bool, dst_hit: bool, is_range: bool) -> Direction {
    match (src_hit, dst_hit) {
        (true, false) => Direction::Outgoing,
        (false, true) => Direction::Incoming,
        (true, true) if is_range => Direction::Internal,
        _ => Direction::Mixed,
    }
}

/// `(bytes_in, bytes_out)` for one record.
pub fn attribute_bytes(direction: Direction, bytes: i64) -> (i64, i64) {
    match direction {
        Direction::Outgoing => (0, bytes),
        Direction::Incoming => (bytes, 0),
        Direction::Internal | Direction::Mixed => (bytes / 2, bytes / 2),
    }
}

/// Inbound bytes over `src_hit` / `dst_hit` / `bytes` columns.
pub(crate) const BYTES_IN_SQL: &str = "CASE \
    WHEN src_hit AND NOT dst_hit THEN 0 \
    WHEN dst_hit AND NOT src_hit THEN bytes \
    ELSE bytes / 2 END";

/// Outbound bytes over `src_hit` / `dst_hit` / `bytes` columns.
pub(crate) const BYTES_OUT_SQL: &str = "CASE \
    WHEN src_hit AND NOT dst_hit THEN bytes \
    WHEN dst_hit AND NOT src_hit THEN 0 \
    ELSE bytes / 2 END";
