//! Canonical representation of a range query and its result.
//!
//! Everything in here is plain data. The request and response codecs produce
//! these types at the boundary and the merge engine consumes them, so the
//! invariants documented on each type hold everywhere past decoding:
//!
//! - [`Labels`] are always sorted by name and free of duplicate names.
//! - [`Sample`] timestamps are integer milliseconds.
//! - A [`SampleStream`] coming out of the response decoder or the merge
//!   engine has strictly ascending timestamps.
//! - Decoded results are always matrix results. The other [`ResultType`]s
//!   exist so error and empty results can be represented and re-encoded.
//!
//! The JSON shape of a stream follows the range-query API:
//!
//! ```json
//! {"metric": {"job": "api", "instance": "a"}, "values": [[1536673680, "137"]]}
//! ```

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Millisecond timestamp since the Unix epoch.
pub type TimestampMs = i64;

/// A range query after parsing and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRangeRequest {
    /// Endpoint path the request was received on, used verbatim downstream.
    pub path: String,
    pub start: TimestampMs,
    pub end: TimestampMs,
    /// Resolution in milliseconds, always positive.
    pub step: i64,
    /// Raw query expression, never interpreted here.
    pub query: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    #[default]
    Matrix,
    Vector,
    Scalar,
    String,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Matrix => "matrix",
            ResultType::Vector => "vector",
            ResultType::Scalar => "scalar",
            ResultType::String => "string",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded API response, success or error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiResponse {
    pub status: Status,
    pub data: QueryRangeResponse,
    pub error_type: Option<String>,
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn success(data: QueryRangeResponse) -> Self {
        Self {
            status: Status::Success,
            data,
            error_type: None,
            error: None,
        }
    }

    /// An error result never carries series.
    pub fn error(error_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            data: QueryRangeResponse::default(),
            error_type: Some(error_type.into()),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRangeResponse {
    #[serde(rename = "resultType")]
    pub result_type: ResultType,
    pub result: Vec<SampleStream>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleStream {
    #[serde(rename = "metric")]
    pub labels: Labels,
    #[serde(rename = "values")]
    pub samples: Vec<Sample>,
}

impl SampleStream {
    pub fn new(labels: Labels, samples: Vec<Sample>) -> Self {
        Self { labels, samples }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Label set of one series, kept sorted by name.
///
/// Sorting happens on construction, so two label sets built from the same
/// pairs in different orders compare and hash equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Builds a canonical label set. Later duplicates of a name are rejected.
    pub fn try_from_pairs<I, N, V>(pairs: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        let mut labels: Vec<Label> = pairs
            .into_iter()
            .map(|(name, value)| Label::new(name, value))
            .collect();
        labels.sort_by(|a, b| a.name.cmp(&b.name));

        if let Some(pair) = labels.windows(2).find(|pair| pair[0].name == pair[1].name) {
            return Err(pair[0].name.clone());
        }

        Ok(Self(labels))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|label| label.name.as_str().cmp(name))
            .ok()
            .map(|idx| self.0[idx].value.as_str())
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}=\"{}\"", label.name, label.value)?;
        }
        f.write_str("}")
    }
}

impl Serialize for Labels {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for label in &self.0 {
            map.serialize_entry(&label.name, &label.value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Labels {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LabelsVisitor;

        impl<'de> Visitor<'de> for LabelsVisitor {
            type Value = Labels;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of label names to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Labels, A::Error> {
                // Collected in wire order and sorted afterwards; map iteration
                // order is never relied upon.
                let mut pairs: Vec<(String, String)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, value)) = access.next_entry::<String, String>()? {
                    pairs.push((name, value));
                }
                Labels::try_from_pairs(pairs)
                    .map_err(|name| de::Error::custom(format!("duplicate label name: {name}")))
            }
        }

        deserializer.deserialize_map(LabelsVisitor)
    }
}

/// One measurement. Equality is bitwise on the value so `NaN` samples
/// compare equal to themselves.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub timestamp_ms: TimestampMs,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp_ms: TimestampMs, value: f64) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }

    pub fn same_value(&self, other: &Sample) -> bool {
        self.value.to_bits() == other.value.to_bits()
            || (self.value.is_nan() && other.value.is_nan())
    }
}

impl PartialEq for Sample {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp_ms == other.timestamp_ms && self.same_value(other)
    }
}

/// Formats a value the way the API encodes it: shortest decimal, no exponent,
/// with `NaN`, `+Inf` and `-Inf` for the special values.
pub fn format_sample_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

/// Parses an encoded sample value. Only the documented spellings of the
/// special values are accepted; finite input that overflows is rejected.
pub fn parse_sample_value(raw: &str) -> Option<f64> {
    match raw {
        "NaN" => Some(f64::NAN),
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        _ => raw.parse::<f64>().ok().filter(|value| value.is_finite()),
    }
}

/// Converts wire seconds to milliseconds, rounding to the nearest millisecond.
pub fn seconds_to_millis(seconds: f64) -> Option<TimestampMs> {
    let millis = (seconds * 1000.0).round();
    if millis.is_finite() && millis >= i64::MIN as f64 && millis <= i64::MAX as f64 {
        Some(millis as TimestampMs)
    } else {
        None
    }
}

/// Formats milliseconds as decimal seconds: an integer when whole, otherwise
/// the shortest fraction that parses back to the same millisecond.
pub fn format_millis_as_seconds(millis: i64) -> String {
    if millis % 1000 == 0 {
        (millis / 1000).to_string()
    } else {
        (millis as f64 / 1000.0).to_string()
    }
}

impl Serialize for Sample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        if self.timestamp_ms % 1000 == 0 {
            tuple.serialize_element(&(self.timestamp_ms / 1000))?;
        } else {
            tuple.serialize_element(&(self.timestamp_ms as f64 / 1000.0))?;
        }
        tuple.serialize_element(&format_sample_value(self.value))?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for Sample {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SampleVisitor;

        impl<'de> Visitor<'de> for SampleVisitor {
            type Value = Sample;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a [timestamp, \"value\"] pair")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Sample, A::Error> {
                let seconds: f64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let raw: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                if seq.next_element::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_length(3, &self));
                }

                let timestamp_ms = seconds_to_millis(seconds).ok_or_else(|| {
                    de::Error::custom(format!("timestamp out of range: {seconds}"))
                })?;
                let value = parse_sample_value(&raw)
                    .ok_or_else(|| de::Error::custom(format!("invalid sample value: {raw:?}")))?;

                Ok(Sample {
                    timestamp_ms,
                    value,
                })
            }
        }

        deserializer.deserialize_seq(SampleVisitor)
    }
}
