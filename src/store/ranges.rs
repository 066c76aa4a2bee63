//! Known provisioned ranges for an address
//!
//! The `connections` table belongs to the billing side; the query engine
//! only needs "which ranges is this address provisioned with", so that is
//! all this trait exposes.

use super::db::{FlowStore, StoreError};
use ip_network::IpNetwork;
use std::net::IpAddr;

pub trait RangeLookup: Send + Sync {
    /// Every provisioned range associated with `address` (possibly none).
    fn ranges_for_address(&self, address: IpAddr) -> Result<Vec<IpNetwork>, StoreError>;
}

/// `RangeLookup` backed by the `connections(ip_address, mask)` table.
#[derive(Clone)]
pub struct ConnectionRanges {
    store: FlowStore,
}

impl ConnectionRanges {
    pub fn new(store: FlowStore) -> Self {
        Self { store }
    }
}

impl RangeLookup for ConnectionRanges {
    fn ranges_for_address(&self, address: IpAddr) -> Result<Vec<IpNetwork>, StoreError> {
        let conn = self.store.open_reader()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT ip_address, mask FROM connections WHERE ip_address = ?1 ORDER BY mask",
        )?;

        let rows = stmt.query_map([address.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut ranges = Vec::new();
        for row in rows {
            let (ip_text, mask) = row?;
            let parsed = ip_text
                .trim()
                .parse::<IpAddr>()
                .ok()
                .zip(u8::try_from(mask).ok())
                .and_then(|(ip, mask)| IpNetwork::new_truncate(ip, mask).ok());

            match parsed {
                Some(network) if !ranges.contains(&network) => ranges.push(network),
                Some(_) => {}
                None => log::warn!("⚠️  Ignoring malformed connection range {}/{}", ip_text, mask),
            }
        }

        Ok(ranges)
    }
}
