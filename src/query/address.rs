//! Address expression parsing and match-strategy resolution
//!
//! Resolution precedence, first applicable wins:
//! 1. explicit mask parameter → CIDR built from the address and the mask
//! 2. CIDR literal (`a.b.c.d/n`) → range containment
//! 3. wildcard (`10.0.*`) → pattern match
//! 4. plain address with known provisioned ranges → OR of containments
//! 5. plain address → exact equality

use super::types::QueryError;
use crate::store::{RangeLookup, StoreError};
use ip_network::IpNetwork;
use rusqlite::types::Value;
use std::net::IpAddr;

const WILDCARD: char = '*';

/// Parsed form of the `ip` (+ optional `mask`) query input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressExpression {
    Masked(IpNetwork),
    Cidr(IpNetwork),
    /// SQL `LIKE` pattern, `*` already translated to `%`.
    Wildcard(String),
    Plain(IpAddr),
}

impl AddressExpression {
    pub fn parse(ip: &str, mask: Option<&str>) -> Result<Self, QueryError> {
        let ip = ip.trim();
        if ip.is_empty() {
            return Err(QueryError::InvalidAddressExpression("address is required".into()));
        }

        if let Some(mask) = mask.map(str::trim).filter(|m| !m.is_empty()) {
            // Mask wins; a CIDR-shaped ip contributes only its address part
            let address_part = ip.split('/').next().unwrap_or(ip);
            let address: IpAddr = address_part
                .parse()
                .map_err(|_| QueryError::InvalidAddressExpression(ip.to_string()))?;
            let prefix = parse_prefix(address, mask).ok_or_else(|| QueryError::InvalidMask(mask.to_string()))?;
            let network = IpNetwork::new_truncate(address, prefix)
                .map_err(|_| QueryError::InvalidMask(mask.to_string()))?;
            return Ok(AddressExpression::Masked(network));
        }

        if let Some((address_part, prefix_part)) = ip.split_once('/') {
            let network = address_part
                .parse::<IpAddr>()
                .ok()
                .and_then(|address| Some((address, parse_prefix(address, prefix_part)?)))
                .and_then(|(address, prefix)| IpNetwork::new_truncate(address, prefix).ok())
                .ok_or_else(|| QueryError::InvalidCidr(ip.to_string()))?;
            return Ok(AddressExpression::Cidr(network));
        }

        if ip.contains(WILDCARD) {
            let valid = ip
                .chars()
                .all(|c| c.is_ascii_hexdigit() || c == '.' || c == ':' || c == WILDCARD);
            if !valid {
                return Err(QueryError::InvalidAddressExpression(ip.to_string()));
            }
            return Ok(AddressExpression::Wildcard(ip.replace(WILDCARD, "%")));
        }

        ip.parse::<IpAddr>()
            .map(AddressExpression::Plain)
            .map_err(|_| QueryError::InvalidAddressExpression(ip.to_string()))
    }

    /// Turn the expression into a predicate, consulting the known
    /// provisioned ranges for plain addresses.
    pub fn resolve(self, ranges: &dyn RangeLookup) -> Result<MatchStrategy, StoreError> {
        Ok(match self {
            AddressExpression::Masked(network) | AddressExpression::Cidr(network) => {
                MatchStrategy::Cidr(network)
            }
            AddressExpression::Wildcard(pattern) => MatchStrategy::Wildcard(pattern),
            AddressExpression::Plain(address) => {
                let known = ranges.ranges_for_address(address)?;
                if known.is_empty() {
                    MatchStrategy::Exact(address)
                } else {
                    MatchStrategy::KnownRanges(known)
                }
            }
        })
    }
}

/// Prefix length bounded by the address family.
fn parse_prefix(address: IpAddr, text: &str) -> Option<u8> {
    let prefix: u8 = text.trim().parse().ok()?;
    (prefix <= max_prefix(address)).then_some(prefix)
}

fn max_prefix(address: IpAddr) -> u8 {
    match address {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn covers_many(network: &IpNetwork) -> bool {
    let full = if network.is_ipv4() { 32 } else { 128 };
    network.netmask() < full
}

/// Resolved predicate over the source/destination columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchStrategy {
    Cidr(IpNetwork),
    Wildcard(String),
    KnownRanges(Vec<IpNetwork>),
    Exact(IpAddr),
}

/// SQL fragments for one strategy.
///
/// `src` and `dst` are boolean expressions over `src_ip` / `dst_ip` that
/// reference `params` as `?1..?n`. Callers number any further parameters
/// after the last of these.
#[derive(Debug, Clone)]
pub struct SqlPredicate {
    pub src: String,
    pub dst: String,
    pub params: Vec<Value>,
}

impl MatchStrategy {
    /// Whether the target denotes more than one address.
    pub fn is_range(&self) -> bool {
        match self {
            MatchStrategy::Cidr(network) => covers_many(network),
            MatchStrategy::Wildcard(_) => true,
            MatchStrategy::KnownRanges(networks) => networks.iter().any(covers_many),
            MatchStrategy::Exact(_) => false,
        }
    }

    pub fn to_sql(&self) -> SqlPredicate {
        let mut params = Vec::new();
        let template = match self {
            MatchStrategy::Cidr(network) => {
                params.push(Value::Text(network.to_string()));
                "inet_contains(?1, {col})".to_string()
            }
            MatchStrategy::Wildcard(pattern) => {
                params.push(Value::Text(pattern.clone()));
                "{col} LIKE ?1".to_string()
            }
            MatchStrategy::KnownRanges(networks) => {
                let clauses: Vec<String> = networks
                    .iter()
                    .enumerate()
                    .map(|(i, network)| {
                        params.push(Value::Text(network.to_string()));
                        format!("inet_contains(?{}, {{col}})", i + 1)
                    })
                    .collect();
                format!("({})", clauses.join(" OR "))
            }
            MatchStrategy::Exact(address) => {
                params.push(Value::Text(address.to_string()));
                "{col} = ?1".to_string()
            }
        };

        SqlPredicate {
            src: template.replace("{col}", "src_ip"),
            dst: template.replace("{col}", "dst_ip"),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRanges(Vec<IpNetwork>);

    impl RangeLookup for FixedRanges {
        fn ranges_for_address(&self, _address: IpAddr) -> Result<Vec<IpNetwork>, StoreError> {
            Ok(self.0.clone())
        }
    }

    fn net(s: &str) -> IpNetwork {
        s.parse().unwrap()
    }

    #[test]
    fn test_mask_parameter_wins() {
        let expr = AddressExpression::parse("10.1.2.3", Some("16")).unwrap();
        assert_eq!(expr, AddressExpression::Masked(net("10.1.0.0/16")));

        // CIDR-shaped ip plus mask: mask replaces the literal prefix
        let expr = AddressExpression::parse("10.1.2.3/8", Some("24")).unwrap();
        assert_eq!(expr, AddressExpression::Masked(net("10.1.2.0/24")));
    }

    #[test]
    fn test_mask_bounds() {
        assert!(matches!(
            AddressExpression::parse("10.0.0.1", Some("33")),
            Err(QueryError::InvalidMask(_))
        ));
        assert!(matches!(
            AddressExpression::parse("10.0.0.1", Some("abc")),
            Err(QueryError::InvalidMask(_))
        ));
        assert!(AddressExpression::parse("2001:db8::1", Some("64")).is_ok());
        assert!(matches!(
            AddressExpression::parse("2001:db8::1", Some("129")),
            Err(QueryError::InvalidMask(_))
        ));
    }

    #[test]
    fn test_masked_requires_real_address() {
        assert!(matches!(
            AddressExpression::parse("10.0.*", Some("24")),
            Err(QueryError::InvalidAddressExpression(_))
        ));
    }

    #[test]
    fn test_cidr_literal() {
        let expr = AddressExpression::parse("10.0.0.7/24", None).unwrap();
        assert_eq!(expr, AddressExpression::Cidr(net("10.0.0.0/24")));

        for bad in ["10.0.0.0/40", "10.0.0/24", "10.0.0.0/", "nope/8"] {
            assert!(
                matches!(AddressExpression::parse(bad, None), Err(QueryError::InvalidCidr(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_wildcard() {
        let expr = AddressExpression::parse("192.168.*", None).unwrap();
        assert_eq!(expr, AddressExpression::Wildcard("192.168.%".to_string()));

        assert!(matches!(
            AddressExpression::parse("192.168.*'; --", None),
            Err(QueryError::InvalidAddressExpression(_))
        ));
    }

    #[test]
    fn test_plain_and_invalid() {
        let expr = AddressExpression::parse(" 10.0.0.5 ", None).unwrap();
        assert_eq!(expr, AddressExpression::Plain("10.0.0.5".parse().unwrap()));

        assert!(matches!(
            AddressExpression::parse("", None),
            Err(QueryError::InvalidAddressExpression(_))
        ));
        assert!(matches!(
            AddressExpression::parse("example.com", None),
            Err(QueryError::InvalidAddressExpression(_))
        ));
    }

    #[test]
    fn test_plain_resolves_to_known_ranges_or_exact() {
        let addr = AddressExpression::parse("10.0.0.5", None).unwrap();

        let none = FixedRanges(vec![]);
        assert_eq!(
            addr.clone().resolve(&none).unwrap(),
            MatchStrategy::Exact("10.0.0.5".parse().unwrap())
        );

        let two = FixedRanges(vec![net("10.0.0.0/24"), net("10.0.0.0/16")]);
        assert_eq!(
            addr.resolve(&two).unwrap(),
            MatchStrategy::KnownRanges(vec![net("10.0.0.0/24"), net("10.0.0.0/16")])
        );
    }

    #[test]
    fn test_is_range() {
        assert!(MatchStrategy::Cidr(net("10.0.0.0/24")).is_range());
        assert!(!MatchStrategy::Cidr(net("10.0.0.1/32")).is_range());
        assert!(MatchStrategy::Wildcard("10.%".into()).is_range());
        assert!(!MatchStrategy::KnownRanges(vec![net("10.0.0.1/32")]).is_range());
        assert!(MatchStrategy::KnownRanges(vec![net("10.0.0.1/32"), net("10.0.0.0/30")]).is_range());
        assert!(!MatchStrategy::Exact("10.0.0.1".parse().unwrap()).is_range());
    }

    #[test]
    fn test_sql_fragments_share_params() {
        let sql = MatchStrategy::KnownRanges(vec![net("10.0.0.0/24"), net("10.0.0.0/16")]).to_sql();
        assert_eq!(
            sql.src,
            "(inet_contains(?1, src_ip) OR inet_contains(?2, src_ip))"
        );
        assert_eq!(
            sql.dst,
            "(inet_contains(?1, dst_ip) OR inet_contains(?2, dst_ip))"
        );
        assert_eq!(sql.params.len(), 2);

        let exact = MatchStrategy::Exact("10.0.0.1".parse().unwrap()).to_sql();
        assert_eq!(exact.src, "src_ip = ?1");
        assert_eq!(exact.params, vec![Value::Text("10.0.0.1".into())]);
    }
}
