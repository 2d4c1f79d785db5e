//! Request codec for the range-query endpoint.
//!
//! Inbound requests look like
//! `GET /api/v1/query_range?start=<ts>&end=<ts>&step=<duration>&query=<expr>`.
//! Timestamps are Unix seconds (fractions allowed) or RFC3339; the step is a
//! number of seconds or a duration literal such as `5m` or `1h30m`.
//!
//! Validation runs in a fixed order and stops at the first failure:
//! `start`, `end`, end before start, `step`, step sign, resolution ceiling.

use crate::context::{ORG_ID_HEADER, RequestContext};
use crate::errors::{FrontendError, RequestError};
use crate::model::{QueryRangeRequest, TimestampMs, format_millis_as_seconds, seconds_to_millis};
use http::{HeaderValue, Method, Request};
use hyper::body::Bytes;
use url::form_urlencoded;

/// Upper bound on `(end - start) / step`, the number of points per series.
pub const MAX_POINTS_PER_SERIES: i64 = 11_000;

const MILLIS_PER_SECOND: i64 = 1_000;
const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;
const MILLIS_PER_WEEK: i64 = 7 * MILLIS_PER_DAY;
const MILLIS_PER_YEAR: i64 = 365 * MILLIS_PER_DAY;

/// Parses and validates an inbound range query.
pub fn parse_request<B>(request: &Request<B>) -> Result<QueryRangeRequest, RequestError> {
    let query_string = request.uri().query().unwrap_or("");
    let param = |name: &str| -> String {
        form_urlencoded::parse(query_string.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default()
    };

    let start = parse_time("start", &param("start"))?;
    let end = parse_time("end", &param("end"))?;
    if end < start {
        return Err(RequestError::EndBeforeStart);
    }

    let step = parse_duration("step", &param("step"))?;
    if step <= 0 {
        return Err(RequestError::NegativeOrZeroStep);
    }

    let too_many_points = end
        .checked_sub(start)
        .is_none_or(|range| range / step > MAX_POINTS_PER_SERIES);
    if too_many_points {
        return Err(RequestError::StepTooSmall);
    }

    Ok(QueryRangeRequest {
        path: request.uri().path().to_string(),
        start,
        end,
        step,
        query: param("query"),
    })
}

impl QueryRangeRequest {
    /// Builds the downstream GET request. Parameters are emitted sorted by
    /// name, so a request accepted by [`parse_request`] re-encodes to the
    /// same URI.
    pub fn to_http_request(&self, ctx: &RequestContext) -> Result<Request<Bytes>, FrontendError> {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("end", &format_millis_as_seconds(self.end))
            .append_pair("query", &self.query)
            .append_pair("start", &format_millis_as_seconds(self.start))
            .append_pair("step", &format_millis_as_seconds(self.step))
            .finish();

        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(format!("{}?{}", self.path, query));

        if let Some(org_id) = &ctx.org_id {
            let value = HeaderValue::from_str(org_id)
                .map_err(|e| FrontendError::InternalError(format!("Invalid org id: {e}")))?;
            builder = builder.header(ORG_ID_HEADER, value);
        }

        builder
            .body(Bytes::new())
            .map_err(|e| FrontendError::InternalError(format!("Failed to build request: {e}")))
    }
}

/// Unix seconds (possibly fractional) or RFC3339, to milliseconds.
fn parse_time(field: &'static str, raw: &str) -> Result<TimestampMs, RequestError> {
    let bad_timestamp = || RequestError::BadTimestamp {
        field,
        value: raw.to_string(),
    };

    if let Ok(seconds) = raw.parse::<f64>() {
        return seconds_to_millis(seconds).ok_or_else(bad_timestamp);
    }

    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.timestamp_millis())
        .map_err(|_| bad_timestamp())
}

/// Seconds (possibly fractional) or a duration literal, to milliseconds.
fn parse_duration(field: &'static str, raw: &str) -> Result<i64, RequestError> {
    let bad_duration = || RequestError::BadDuration {
        field,
        value: raw.to_string(),
    };

    if let Ok(seconds) = raw.parse::<f64>() {
        return seconds_to_millis(seconds).ok_or_else(bad_duration);
    }

    parse_duration_literal(raw).ok_or_else(bad_duration)
}

/// Parses `[0-9]+<unit>` groups with units `y w d h m s ms`, each used at most
/// once and in that order, e.g. `1h30m` or `2d`.
fn parse_duration_literal(raw: &str) -> Option<i64> {
    if raw == "0" {
        return Some(0);
    }

    let mut rest = raw;
    let mut total: i64 = 0;
    let mut last_rank: Option<u8> = None;

    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let number: i64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let (rank, unit_ms, unit_len) = if rest.starts_with("ms") {
            (6, 1, 2)
        } else {
            match rest.as_bytes().first()? {
                b'y' => (0, MILLIS_PER_YEAR, 1),
                b'w' => (1, MILLIS_PER_WEEK, 1),
                b'd' => (2, MILLIS_PER_DAY, 1),
                b'h' => (3, MILLIS_PER_HOUR, 1),
                b'm' => (4, MILLIS_PER_MINUTE, 1),
                b's' => (5, MILLIS_PER_SECOND, 1),
                _ => return None,
            }
        };
        rest = &rest[unit_len..];

        if last_rank.is_some_and(|last| rank <= last) {
            return None;
        }
        last_rank = Some(rank);

        total = total.checked_add(number.checked_mul(unit_ms)?)?;
    }

    last_rank.map(|_| total)
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUERY: &str = "/api/v1/query_range?end=1536716898&query=sum%28container_memory_rss%29+by+%28namespace%29&start=1536673680&step=120";

    fn get(uri: &str) -> Request<()> {
        Request::builder().uri(uri).body(()).unwrap()
    }

    fn parsed_request() -> QueryRangeRequest {
        QueryRangeRequest {
            path: "/api/v1/query_range".to_string(),
            start: 1_536_673_680 * 1000,
            end: 1_536_716_898 * 1000,
            step: 120 * 1000,
            query: "sum(container_memory_rss) by (namespace)".to_string(),
        }
    }

    #[test]
    fn test_parse_and_round_trip() {
        let request = parse_request(&get(QUERY)).unwrap();
        assert_eq!(request, parsed_request());

        let outbound = request.to_http_request(&RequestContext::default()).unwrap();
        assert_eq!(outbound.method(), Method::GET);
        assert_eq!(outbound.uri().to_string(), QUERY);
        assert!(outbound.body().is_empty());

        assert_eq!(parse_request(&outbound).unwrap(), request);
    }

    #[test]
    fn test_validation_errors() {
        let cases: Vec<(&str, RequestError)> = vec![
            (
                "/api/v1/query_range?start=foo",
                RequestError::BadTimestamp {
                    field: "start",
                    value: "foo".to_string(),
                },
            ),
            (
                "/api/v1/query_range?start=123&end=bar",
                RequestError::BadTimestamp {
                    field: "end",
                    value: "bar".to_string(),
                },
            ),
            (
                "/api/v1/query_range?start=123&end=0",
                RequestError::EndBeforeStart,
            ),
            (
                "/api/v1/query_range?start=123&end=456&step=baz",
                RequestError::BadDuration {
                    field: "step",
                    value: "baz".to_string(),
                },
            ),
            (
                "/api/v1/query_range?start=123&end=456&step=-1",
                RequestError::NegativeOrZeroStep,
            ),
            (
                "/api/v1/query_range?start=123&end=456&step=0",
                RequestError::NegativeOrZeroStep,
            ),
            (
                "/api/v1/query_range?start=0&end=11001&step=1",
                RequestError::StepTooSmall,
            ),
        ];

        for (uri, expected) in cases {
            assert_eq!(parse_request(&get(uri)).unwrap_err(), expected, "uri: {uri}");
        }
    }

    #[test]
    fn test_missing_start_names_field() {
        let err = parse_request(&get("/api/v1/query_range?end=10&step=1")).unwrap_err();
        assert_eq!(
            err,
            RequestError::BadTimestamp {
                field: "start",
                value: String::new(),
            }
        );
    }

    #[test]
    fn test_resolution_ceiling_is_inclusive() {
        let request = parse_request(&get("/api/v1/query_range?start=0&end=11000&step=1")).unwrap();
        assert_eq!(request.end, 11_000_000);
        assert_eq!(request.step, 1000);
    }

    #[test]
    fn test_fractional_seconds_round_trip() {
        let uri = "/api/v1/query_range?end=1536716898.5&query=up&start=1536716800.25&step=0.5";
        let request = parse_request(&get(uri)).unwrap();
        assert_eq!(request.start, 1_536_716_800_250);
        assert_eq!(request.end, 1_536_716_898_500);
        assert_eq!(request.step, 500);

        let outbound = request.to_http_request(&RequestContext::default()).unwrap();
        assert_eq!(outbound.uri().to_string(), uri);
    }

    #[test]
    fn test_rfc3339_timestamps() {
        let request = parse_request(&get(
            "/api/v1/query_range?start=2018-09-11T22:00:00.123%2B02:00&end=2018-09-12T00:00:00Z&step=60",
        ))
        .unwrap();
        assert_eq!(request.start, 1_536_696_000_123);
        assert_eq!(request.end, 1_536_710_400_000);
    }

    #[test]
    fn test_duration_literals() {
        let step = |raw: &str| parse_duration("step", raw);
        assert_eq!(step("5m"), Ok(300_000));
        assert_eq!(step("1h30m"), Ok(5_400_000));
        assert_eq!(step("1d"), Ok(86_400_000));
        assert_eq!(step("2w"), Ok(1_209_600_000));
        assert_eq!(step("1y"), Ok(31_536_000_000));
        assert_eq!(step("1s500ms"), Ok(1_500));
        assert_eq!(step("250ms"), Ok(250));
        assert_eq!(step("1.5"), Ok(1_500));

        // Bare numbers are seconds.
        assert_eq!(step("5"), Ok(5_000));

        for raw in ["", "m", "5x", "30m1h", "1m1m", "1h-5m", "5 m", "inf"] {
            assert_eq!(
                step(raw),
                Err(RequestError::BadDuration {
                    field: "step",
                    value: raw.to_string(),
                }),
                "raw: {raw:?}"
            );
        }
    }

    #[test]
    fn test_query_is_unescaped() {
        let request = parse_request(&get(
            "/api/v1/query_range?start=0&end=60&step=15&query=rate%28http_requests_total%7Bjob%3D%22api%22%7D%5B5m%5D%29",
        ))
        .unwrap();
        assert_eq!(request.query, r#"rate(http_requests_total{job="api"}[5m])"#);
    }

    #[test]
    fn test_org_id_is_forwarded() {
        let request = parsed_request();
        let outbound = request
            .to_http_request(&RequestContext::with_org_id("tenant-1"))
            .unwrap();
        assert_eq!(outbound.headers().get(&ORG_ID_HEADER).unwrap(), "tenant-1");

        let outbound = request.to_http_request(&RequestContext::default()).unwrap();
        assert!(outbound.headers().get(&ORG_ID_HEADER).is_none());
    }
}
