//! Canonical decoded cell values.

use base64::Engine;
use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::net::IpAddr;
use uuid::Uuid;

/// A decoded cell value, independent of its on-disk encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Boolean(bool),
    /// tinyint, smallint, int, bigint and counter
    Int(i64),
    /// float and double
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    /// Exact decimal rendered as a string, e.g. `-12.340`
    Decimal(String),
    /// Arbitrary precision integer rendered as a string
    Varint(String),
    Date(NaiveDate),
    /// Nanoseconds since midnight
    Time(i64),
    /// Milliseconds since the Unix epoch
    Timestamp(i64),
    Inet(IpAddr),
    Duration {
        months: i32,
        days: i32,
        nanos: i64,
    },
    /// Decoded UUID before logical formatting
    Uuid(Uuid),
    List(Vec<CellValue>),
    Set(Vec<CellValue>),
    Map(Vec<(CellValue, CellValue)>),
    Tuple(Vec<CellValue>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// JSON form used in emitted messages.
    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::Boolean(b) => Value::Bool(*b),
            CellValue::Int(i) => json!(i),
            // NaN and infinities have no JSON form and become null
            CellValue::Float(f) => json!(f),
            CellValue::Text(s) | CellValue::Decimal(s) | CellValue::Varint(s) => {
                Value::String(s.clone())
            }
            CellValue::Blob(bytes) => {
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            CellValue::Date(date) => Value::String(date.format("%Y-%m-%d").to_string()),
            CellValue::Time(nanos) => json!(nanos),
            CellValue::Timestamp(millis) => json!(millis),
            CellValue::Inet(addr) => Value::String(addr.to_string()),
            CellValue::Duration {
                months,
                days,
                nanos,
            } => json!({
                "months": months,
                "days": days,
                "nanoseconds": nanos,
            }),
            CellValue::Uuid(uuid) => Value::String(uuid.hyphenated().to_string()),
            CellValue::List(items) | CellValue::Set(items) | CellValue::Tuple(items) => {
                Value::Array(items.iter().map(CellValue::to_json).collect())
            }
            CellValue::Map(entries) => {
                let mut object = Map::with_capacity(entries.len());
                for (k, v) in entries {
                    object.insert(k.key_string(), v.to_json());
                }
                Value::Object(object)
            }
        }
    }

    /// String form of a value used as a JSON object key.
    fn key_string(&self) -> String {
        match self.to_json() {
            Value::String(s) => s,
            other => other.to_string(),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
