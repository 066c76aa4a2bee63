//! Flow tuples produced by the decoder and the keys used to compact them.

/// Width of a storage bucket in seconds (5 minutes).
pub const BUCKET_SECONDS: i64 = 5 * 60;

/// One decoded flow record.
///
/// `timestamp` is unix seconds (UTC). After aggregation it holds the
/// bucket start rather than the original observation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowTuple {
    pub timestamp: i64,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub packets: i64,
    pub bytes: i64,
}

/// Identity of a flow inside one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationKey {
    pub bucket_start: i64,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

impl AggregationKey {
    pub fn for_flow(flow: &FlowTuple) -> Self {
        Self {
            bucket_start: truncate_to_bucket(flow.timestamp),
            src_ip: flow.src_ip.clone(),
            dst_ip: flow.dst_ip.clone(),
            src_port: flow.src_port,
            dst_port: flow.dst_port,
            protocol: flow.protocol,
        }
    }
}

/// Floor-align a unix timestamp to the start of its bucket.
///
/// `div_euclid` keeps pre-epoch timestamps floor-aligned as well.
pub fn truncate_to_bucket(timestamp: i64) -> i64 {
    timestamp.div_euclid(BUCKET_SECONDS) * BUCKET_SECONDS
}
