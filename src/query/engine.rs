//! Flow Query Engine
//!
//! Read-only over the flow store. Every query resolves its address
//! expression into a `MatchStrategy` first (which may consult the known
//! provisioned ranges), then runs against a `matched` CTE that carries the
//! `src_hit` / `dst_hit` flags next to each row. Page rows and whole-set
//! totals are both computed from those flags, so they always agree.

use super::address::{AddressExpression, MatchStrategy, SqlPredicate};
use super::direction::{attribute_bytes, infer_direction, BYTES_IN_SQL, BYTES_OUT_SQL};
use super::types::{
    AddressAggregationBucket, AggregateRequest, AggregationBucket, FlowRecord, Granularity,
    QueryError, SearchRequest, SearchResult,
};
use crate::store::{FlowStore, RangeLookup};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::sync::Arc;

const DATE_FORMAT: &str = "%Y-%m-%d";
const SECONDS_PER_DAY: i64 = 86_400;
/// Largest page a single search returns.
pub const MAX_PAGE_SIZE: i64 = 1_000;

/// Bucket expression: truncate with `strftime`, then back to unix seconds.
/// `?{n}` is bound to the granularity's truncation format.
fn period_sql(format_param: usize) -> String {
    format!(
        "CAST(strftime('%s', strftime(?{}, timestamp, 'unixepoch')) AS INTEGER)",
        format_param
    )
}

pub struct FlowQueryEngine {
    store: FlowStore,
    ranges: Arc<dyn RangeLookup>,
    default_page_size: i64,
}

impl FlowQueryEngine {
    pub fn new(store: FlowStore, ranges: Arc<dyn RangeLookup>, default_page_size: i64) -> Self {
        Self {
            store,
            ranges,
            default_page_size: default_page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Parse and resolve an address expression.
    ///
    /// Runs before the main query opens its read connection; the range
    /// lookup opens its own.
    pub fn resolve(&self, ip: Option<&str>, mask: Option<&str>) -> Result<MatchStrategy, QueryError> {
        let expression = AddressExpression::parse(ip.unwrap_or_default(), mask)?;
        Ok(expression.resolve(self.ranges.as_ref())?)
    }

    /// One page of matching flows, newest first, plus whole-set totals.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResult, QueryError> {
        let strategy = self.resolve(request.ip.as_deref(), request.mask.as_deref())?;
        let (from, to) = parse_date_window(request.from.as_deref(), request.to.as_deref())?;
        let (page, limit) = paginate(
            request.page.as_deref(),
            request.limit.as_deref(),
            self.default_page_size,
        );

        let mut filters = Vec::new();
        if let Some(from) = from {
            filters.push((">=", from));
        }
        if let Some(to) = to {
            filters.push(("<", to));
        }

        let is_range = strategy.is_range();
        let matched = MatchedFlows::build(&strategy.to_sql(), &filters);

        let conn = self.store.open_reader()?;

        let totals_sql = format!(
            "{} SELECT COUNT(*), COALESCE(SUM({}), 0), COALESCE(SUM({}), 0), COALESCE(SUM(bytes), 0) FROM matched",
            matched.cte, BYTES_IN_SQL, BYTES_OUT_SQL
        );
        let (total_records, total_bytes_in, total_bytes_out, total_traffic): (i64, i64, i64, i64) =
            conn.query_row(&totals_sql, params_from_iter(matched.params.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;

        let mut page_params = matched.params.clone();
        page_params.push(Value::Integer(limit));
        let limit_param = page_params.len();
        page_params.push(Value::Integer((page - 1).saturating_mul(limit)));
        let offset_param = page_params.len();

        let page_sql = format!(
            r#"{}
            SELECT id, timestamp, src_ip, dst_ip, src_port, dst_port, protocol, packets, bytes,
                   src_hit, dst_hit
            FROM matched
            ORDER BY timestamp DESC, id DESC
            LIMIT ?{} OFFSET ?{}"#,
            matched.cte, limit_param, offset_param
        );

        let mut stmt = conn.prepare(&page_sql)?;
        let flows = stmt
            .query_map(params_from_iter(page_params.iter()), |row| {
                let bytes: i64 = row.get(8)?;
                let direction = infer_direction(row.get(9)?, row.get(10)?, is_range);
                let (bytes_in, bytes_out) = attribute_bytes(direction, bytes);

                Ok(FlowRecord {
                    id: row.get(0)?,
                    timestamp: to_utc(1, row.get(1)?)?,
                    src_ip: row.get(2)?,
                    dst_ip: row.get(3)?,
                    src_port: row.get(4)?,
                    dst_port: row.get(5)?,
                    protocol: row.get(6)?,
                    packets: row.get(7)?,
                    bytes,
                    direction,
                    bytes_in,
                    bytes_out,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SearchResult {
            flows,
            total_records,
            total_bytes_in,
            total_bytes_out,
            total_traffic,
            page,
            limit,
            total_pages: page_count(total_records, limit),
        })
    }

    /// Byte totals over all flows, bucketed by `granularity`, oldest first.
    pub fn aggregate(&self, request: &AggregateRequest) -> Result<Vec<AggregationBucket>, QueryError> {
        let (start, end) = parse_rfc3339_window(request.start_time.as_deref(), request.end_time.as_deref())?;
        let granularity = Granularity::parse_optional(request.granularity.as_deref())?;

        let sql = format!(
            r#"
            SELECT {} AS period, SUM(bytes)
            FROM flows
            WHERE timestamp BETWEEN ?2 AND ?3
            GROUP BY period
            ORDER BY period
            "#,
            period_sql(1)
        );

        let conn = self.store.open_reader()?;
        let mut stmt = conn.prepare(&sql)?;
        let buckets = stmt
            .query_map(
                rusqlite::params![granularity.truncation_format(), start, end],
                |row| {
                    Ok(AggregationBucket {
                        time_period: to_utc(0, row.get(0)?)?,
                        total_bytes: row.get(1)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(buckets)
    }

    /// Like `aggregate`, restricted to flows matching an address
    /// expression and split into in/out with the same direction rules as
    /// `search`.
    pub fn aggregate_by_address(
        &self,
        request: &AggregateRequest,
    ) -> Result<Vec<AddressAggregationBucket>, QueryError> {
        let strategy = self.resolve(request.ip.as_deref(), request.mask.as_deref())?;
        let (start, end) = parse_rfc3339_window(request.start_time.as_deref(), request.end_time.as_deref())?;
        let granularity = Granularity::parse_optional(request.granularity.as_deref())?;

        let matched = MatchedFlows::build(&strategy.to_sql(), &[(">=", start), ("<=", end)]);
        let mut params = matched.params.clone();
        params.push(Value::Text(granularity.truncation_format().to_string()));
        let format_param = params.len();

        let sql = format!(
            r#"{}
            SELECT {} AS period, COALESCE(SUM({}), 0), COALESCE(SUM({}), 0), SUM(bytes)
            FROM matched
            GROUP BY period
            ORDER BY period"#,
            matched.cte,
            period_sql(format_param),
            BYTES_IN_SQL,
            BYTES_OUT_SQL
        );

        let conn = self.store.open_reader()?;
        let mut stmt = conn.prepare(&sql)?;
        let buckets = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok(AddressAggregationBucket {
                    time_period: to_utc(0, row.get(0)?)?,
                    bytes_in: row.get(1)?,
                    bytes_out: row.get(2)?,
                    total_bytes: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(buckets)
    }
}

/// `WITH matched AS (...)` prefix plus its bound parameters.
struct MatchedFlows {
    cte: String,
    params: Vec<Value>,
}

impl MatchedFlows {
    fn build(predicate: &SqlPredicate, time_filters: &[(&str, i64)]) -> Self {
        let mut params = predicate.params.clone();
        let mut conditions = vec![format!("({} OR {})", predicate.src, predicate.dst)];

        for (op, value) in time_filters {
            params.push(Value::Integer(*value));
            conditions.push(format!("timestamp {} ?{}", op, params.len()));
        }

        let cte = format!(
            r#"WITH matched AS (
                SELECT id, timestamp, src_ip, dst_ip, src_port, dst_port, protocol, packets, bytes,
                       ({}) AS src_hit,
                       ({}) AS dst_hit
                FROM flows
                WHERE {}
            )"#,
            predicate.src,
            predicate.dst,
            conditions.join(" AND ")
        );

        Self { cte, params }
    }
}

/// Page defaults to 1 and limit to `default_limit` when absent,
/// unparseable, zero or negative. Limit is capped at `MAX_PAGE_SIZE`.
fn paginate(page: Option<&str>, limit: Option<&str>, default_limit: i64) -> (i64, i64) {
    let positive = |value: Option<&str>| {
        value
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|v| *v > 0)
    };
    (
        positive(page).unwrap_or(1),
        positive(limit).unwrap_or(default_limit).min(MAX_PAGE_SIZE),
    )
}

/// `ceil(total / limit)`; `limit` is always in `1..=MAX_PAGE_SIZE`.
fn page_count(total_records: i64, limit: i64) -> i64 {
    (total_records + limit - 1) / limit
}

/// `from` starts its day, `to` covers its whole day (exclusive bound on
/// the next midnight).
fn parse_date_window(from: Option<&str>, to: Option<&str>) -> Result<(Option<i64>, Option<i64>), QueryError> {
    let day_start = |value: Option<&str>| -> Result<Option<i64>, QueryError> {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some(v) => NaiveDate::parse_from_str(v, DATE_FORMAT)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|midnight| Some(midnight.and_utc().timestamp()))
                .ok_or_else(|| QueryError::InvalidTimeRange(format!("expected YYYY-MM-DD, got '{}'", v))),
        }
    };

    Ok((day_start(from)?, day_start(to)?.map(|t| t + SECONDS_PER_DAY)))
}

/// Both bounds required, RFC3339, `start <= end`.
fn parse_rfc3339_window(start: Option<&str>, end: Option<&str>) -> Result<(i64, i64), QueryError> {
    let parse = |name: &str, value: Option<&str>| -> Result<i64, QueryError> {
        let value = value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| QueryError::InvalidTimeRange(format!("{} is required", name)))?;
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc).timestamp())
            .map_err(|e| QueryError::InvalidTimeRange(format!("{} '{}': {}", name, value, e)))
    };

    let start = parse("start_time", start)?;
    let end = parse("end_time", end)?;
    if start > end {
        return Err(QueryError::InvalidTimeRange("start_time is after end_time".into()));
    }
    Ok((start, end))
}

fn to_utc(column: usize, seconds: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(seconds, 0).ok_or(rusqlite::Error::IntegralValueOutOfRange(column, seconds))
}
