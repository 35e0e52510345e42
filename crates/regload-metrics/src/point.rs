//! Time-series points.
//!
//! A [`Point`] is a measurement name, a tag set, a field set and a UTC
//! timestamp. Points render either as JSON (timestamp in ISO-8601) or as
//! InfluxDB line protocol (timestamp in nanoseconds).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Default measurement name for request points.
pub const DEFAULT_MEASUREMENT: &str = "REST_Table";

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl FieldValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Bool(_) | FieldValue::Str(_) => None,
        }
    }

    fn write_line_protocol(&self, out: &mut String) {
        match self {
            FieldValue::Int(v) => {
                let _ = write!(out, "{v}i");
            }
            FieldValue::Float(v) => {
                let _ = write!(out, "{v}");
            }
            FieldValue::Bool(v) => {
                let _ = write!(out, "{v}");
            }
            FieldValue::Str(v) => {
                out.push('"');
                for c in v.chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            }
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

/// Extra fields attached to a recorded sample.
pub type Fields = BTreeMap<String, FieldValue>;

/// A time-series point ready for a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    #[serde(with = "iso8601")]
    pub time: DateTime<Utc>,
    pub fields: Fields,
}

impl Point {
    /// Start a point with no tags or fields.
    pub fn new(measurement: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            time,
            fields: BTreeMap::new(),
        }
    }

    /// Add a tag.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Merge extra fields; existing keys are overwritten.
    pub fn with_fields(mut self, extra: Fields) -> Self {
        self.fields.extend(extra);
        self
    }

    /// Render as a single InfluxDB line-protocol line (no trailing newline).
    ///
    /// Empty tag values are omitted since line protocol cannot carry them.
    pub fn to_line_protocol(&self) -> String {
        let mut out = String::with_capacity(128);
        push_escaped(&mut out, &self.measurement, &[',', ' ']);

        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            out.push(',');
            push_escaped(&mut out, key, &[',', ' ', '=']);
            out.push('=');
            push_escaped(&mut out, value, &[',', ' ', '=']);
        }

        out.push(' ');
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            push_escaped(&mut out, key, &[',', ' ', '=']);
            out.push('=');
            value.write_line_protocol(&mut out);
        }

        if let Some(nanos) = self.time.timestamp_nanos_opt() {
            let _ = write!(out, " {nanos}");
        }
        out
    }
}

fn push_escaped(out: &mut String, raw: &str, specials: &[char]) {
    for c in raw.chars() {
        if specials.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

mod iso8601 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
