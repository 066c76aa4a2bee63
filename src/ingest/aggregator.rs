//! 5-minute bucket compaction for one capture file
//!
//! Scope is always a single file's decoded output. The accumulator map is
//! local to `aggregate_flows` and dropped when it returns.

use super::types::{AggregationKey, FlowTuple};
use std::collections::HashMap;

/// Merge flows that share a 5-tuple inside the same bucket.
///
/// Output order is unspecified. Counters are summed (saturating at
/// `i64::MAX`), so the totals do not depend on input order.
pub fn aggregate_flows<I>(flows: I) -> Vec<FlowTuple>
where
    I: IntoIterator<Item = FlowTuple>,
{
    let mut buckets: HashMap<AggregationKey, FlowTuple> = HashMap::new();

    for flow in flows {
        let key = AggregationKey::for_flow(&flow);
        match buckets.get_mut(&key) {
            Some(acc) => {
                acc.packets = acc.packets.saturating_add(flow.packets);
                acc.bytes = acc.bytes.saturating_add(flow.bytes);
            }
            None => {
                let seeded = FlowTuple {
                    timestamp: key.bucket_start,
                    ..flow
                };
                buckets.insert(key, seeded);
            }
        }
    }

    buckets.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(timestamp: i64, src: &str, dst: &str, packets: i64, bytes: i64) -> FlowTuple {
        FlowTuple {
            timestamp,
            src_ip: src.to_string(),
            dst_ip: dst.to_string(),
            src_port: 40000,
            dst_port: 443,
            protocol: 6,
            packets,
            bytes,
        }
    }

    fn sorted(mut flows: Vec<FlowTuple>) -> Vec<FlowTuple> {
        flows.sort_by(|a, b| {
            (a.timestamp, &a.src_ip, &a.dst_ip).cmp(&(b.timestamp, &b.src_ip, &b.dst_ip))
        });
        flows
    }

    #[test]
    fn test_same_key_same_bucket_merges() {
        // 10:05:00, 10:06:10, 10:09:59 all land in the 10:05 bucket
        let base = 1_709_287_500;
        let input = vec![
            flow(base, "10.0.0.1", "10.0.0.2", 1, 100),
            flow(base + 70, "10.0.0.1", "10.0.0.2", 2, 250),
            flow(base + 299, "10.0.0.1", "10.0.0.2", 3, 650),
        ];

        let out = aggregate_flows(input);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, base);
        assert_eq!(out[0].packets, 6);
        assert_eq!(out[0].bytes, 1000);
    }

    #[test]
    fn test_bucket_boundary_splits() {
        let base = 1_709_287_500;
        let input = vec![
            flow(base + 299, "10.0.0.1", "10.0.0.2", 1, 100),
            flow(base + 300, "10.0.0.1", "10.0.0.2", 1, 100),
        ];

        let out = sorted(aggregate_flows(input));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].timestamp, base);
        assert_eq!(out[1].timestamp, base + 300);
    }

    #[test]
    fn test_distinct_tuples_not_merged() {
        let base = 1_709_287_500;
        let mut other_port = flow(base + 5, "10.0.0.1", "10.0.0.2", 1, 100);
        other_port.dst_port = 80;
        let mut other_proto = flow(base + 6, "10.0.0.1", "10.0.0.2", 1, 100);
        other_proto.protocol = 17;

        let input = vec![
            flow(base, "10.0.0.1", "10.0.0.2", 1, 100),
            flow(base + 1, "10.0.0.2", "10.0.0.1", 1, 100),
            other_port,
            other_proto,
        ];

        assert_eq!(aggregate_flows(input).len(), 4);
    }

    #[test]
    fn test_order_independent_totals() {
        let base = 1_709_287_500;
        let input = vec![
            flow(base + 10, "10.0.0.1", "10.0.0.2", 1, 10),
            flow(base + 400, "10.0.0.3", "10.0.0.4", 4, 40),
            flow(base + 20, "10.0.0.1", "10.0.0.2", 2, 20),
            flow(base + 410, "10.0.0.3", "10.0.0.4", 5, 50),
            flow(base + 30, "10.0.0.1", "10.0.0.2", 3, 30),
        ];
        let mut reversed = input.clone();
        reversed.reverse();

        let a = sorted(aggregate_flows(input));
        let b = sorted(aggregate_flows(reversed));
        assert_eq!(a, b);
        assert_eq!(a[0].bytes, 60);
        assert_eq!(a[1].bytes, 90);
    }

    #[test]
    fn test_near_max_counters_saturate() {
        let base = 1_709_287_500;
        let input = vec![
            flow(base, "10.0.0.1", "10.0.0.2", i64::MAX, i64::MAX),
            flow(base + 1, "10.0.0.1", "10.0.0.2", 1, 1),
        ];

        let out = aggregate_flows(input);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].packets, i64::MAX);
        assert_eq!(out[0].bytes, i64::MAX);
    }

    #[test]
    fn test_empty_input_yields_no_buckets() {
        assert!(aggregate_flows(Vec::new()).is_empty());
    }
}
