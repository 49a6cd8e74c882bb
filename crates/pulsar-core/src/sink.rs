// ── Metric emission ──
//
// The host owns delivery and formatting; the poller only hands over
// (measurement, fields, tags, timestamp) tuples.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Measurement name for every record the poller emits.
pub const MEASUREMENT: &str = "pulsar";

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

pub type Fields = BTreeMap<String, FieldValue>;
pub type Tags = BTreeMap<String, String>;

/// Destination for emitted records.
pub trait Accumulator {
    fn add_fields(&mut self, measurement: &str, fields: Fields, tags: Tags, timestamp: DateTime<Utc>);
}

impl<A: Accumulator + ?Sized> Accumulator for &mut A {
    fn add_fields(&mut self, measurement: &str, fields: Fields, tags: Tags, timestamp: DateTime<Utc>) {
        (**self).add_fields(measurement, fields, tags, timestamp);
    }
}

/// An emitted record, as collected by the in-memory accumulator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub measurement: String,
    pub tags: Tags,
    pub fields: Fields,
    pub timestamp: DateTime<Utc>,
}

impl Record {
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }
}

impl Accumulator for Vec<Record> {
    fn add_fields(&mut self, measurement: &str, fields: Fields, tags: Tags, timestamp: DateTime<Utc>) {
        self.push(Record {
            measurement: measurement.to_owned(),
            tags,
            fields,
            timestamp,
        });
    }
}
