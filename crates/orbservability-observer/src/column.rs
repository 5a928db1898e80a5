//! Column value model for Pixie result tables
//!
//! Every cell the execution engine hands us is classified into one of six
//! typed variants. Anything the engine produces that has no typed variant is
//! carried as its string rendering, so classification never fails.

use chrono::{DateTime, SecondsFormat};
use orbservability_common::proto::vizier::DataType;
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// A cell as delivered by the execution engine, before classification
#[derive(Debug, Clone, Copy)]
pub enum RawCell<'a> {
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Time64Ns(i64),
    UInt128 { high: u64, low: u64 },
    String(&'a [u8]),
    /// A cell with no typed variant, carried by the engine's own rendering
    Other(&'a str),
}

/// One classified cell of query output
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    /// Nanoseconds since the Unix epoch
    Time64Ns(i64),
    UInt128(u128),
    String(String),
}

impl ColumnValue {
    /// Classify an engine cell. Total: unknown kinds fall back to their rendering.
    pub fn classify(cell: RawCell<'_>) -> Self {
        match cell {
            RawCell::Boolean(v) => ColumnValue::Boolean(v),
            RawCell::Int64(v) => ColumnValue::Int64(v),
            RawCell::Float64(v) => ColumnValue::Float64(v),
            RawCell::Time64Ns(v) => ColumnValue::Time64Ns(v),
            RawCell::UInt128 { high, low } => {
                ColumnValue::UInt128(((high as u128) << 64) | low as u128)
            }
            // Event fields are proto strings; invalid sequences become U+FFFD
            RawCell::String(bytes) => ColumnValue::String(String::from_utf8_lossy(bytes).into_owned()),
            RawCell::Other(rendered) => ColumnValue::String(rendered.to_string()),
        }
    }

    /// Variant name used in mismatch diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnValue::Boolean(_) => "boolean",
            ColumnValue::Int64(_) => "int64",
            ColumnValue::Float64(_) => "float64",
            ColumnValue::Time64Ns(_) => "time64ns",
            ColumnValue::UInt128(_) => "uint128",
            ColumnValue::String(_) => "string",
        }
    }

    /// Members of a JSON object carried in a string cell.
    ///
    /// Pixie exposes structured values (e.g. `ctx`) as JSON text; this is the
    /// only shape a nested destination field accepts. Null members are omitted.
    pub fn as_nested(&self) -> Option<Vec<(String, ColumnValue)>> {
        let ColumnValue::String(text) = self else {
            return None;
        };
        let Ok(Value::Object(members)) = serde_json::from_str::<Value>(text) else {
            return None;
        };

        Some(
            members
                .into_iter()
                .filter_map(|(name, value)| from_json(value).map(|value| (name, value)))
                .collect(),
        )
    }
}

fn from_json(value: Value) -> Option<ColumnValue> {
    match value {
        Value::Null => None,
        Value::Bool(v) => Some(ColumnValue::Boolean(v)),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Some(ColumnValue::Int64(v))
            } else if let Some(v) = n.as_u64() {
                Some(ColumnValue::UInt128(v as u128))
            } else {
                n.as_f64().map(ColumnValue::Float64)
            }
        }
        Value::String(v) => Some(ColumnValue::String(v)),
        other => Some(ColumnValue::String(other.to_string())),
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Boolean(v) => write!(f, "{}", v),
            ColumnValue::Int64(v) => write!(f, "{}", v),
            ColumnValue::Float64(v) => write!(f, "{}", v),
            ColumnValue::Time64Ns(ns) => f.write_str(
                &DateTime::from_timestamp_nanos(*ns).to_rfc3339_opts(SecondsFormat::Nanos, true),
            ),
            // Same layout Pixie uses when printing UPIDs
            ColumnValue::UInt128(v) => write!(f, "{}", Uuid::from_u128(*v)),
            ColumnValue::String(v) => f.write_str(v),
        }
    }
}

/// Column name and declared type
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: DataType,
}

/// Schema of one result table, announced before its rows
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableMetadata {
    pub id: String,
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableMetadata {
    /// Column names in positional order
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// One row, positionally matched to its table's columns
pub type Row = Vec<ColumnValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_typed_cells() {
        assert_eq!(ColumnValue::classify(RawCell::Boolean(true)), ColumnValue::Boolean(true));
        assert_eq!(ColumnValue::classify(RawCell::Int64(-7)), ColumnValue::Int64(-7));
        assert_eq!(ColumnValue::classify(RawCell::Float64(0.5)), ColumnValue::Float64(0.5));
        assert_eq!(
            ColumnValue::classify(RawCell::Time64Ns(1_700_000_000_000_000_000)),
            ColumnValue::Time64Ns(1_700_000_000_000_000_000)
        );
        assert_eq!(
            ColumnValue::classify(RawCell::UInt128 { high: 0x1, low: 0x2 }),
            ColumnValue::UInt128((1u128 << 64) | 2)
        );
        assert_eq!(
            ColumnValue::classify(RawCell::String(b"nginx")),
            ColumnValue::String("nginx".into())
        );
    }

    #[test]
    fn test_invalid_utf8_string_is_replaced() {
        assert_eq!(
            ColumnValue::classify(RawCell::String(b"ab\xffc")),
            ColumnValue::String("ab\u{FFFD}c".into())
        );
    }

    #[test]
    fn test_classify_falls_back_to_rendering() {
        let value = ColumnValue::classify(RawCell::Other("<DATA_TYPE_UNKNOWN>"));
        assert_eq!(value, ColumnValue::String("<DATA_TYPE_UNKNOWN>".into()));
        assert_eq!(value.type_name(), "string");
    }

    #[test]
    fn test_rendering() {
        assert_eq!(ColumnValue::Boolean(false).to_string(), "false");
        assert_eq!(ColumnValue::Int64(42).to_string(), "42");
        assert_eq!(ColumnValue::Float64(0.1).to_string(), "0.1");
        assert_eq!(
            ColumnValue::UInt128((1u128 << 64) | 2).to_string(),
            "00000000-0000-0001-0000-000000000002"
        );
        assert_eq!(
            ColumnValue::Time64Ns(1_500_000_000).to_string(),
            "1970-01-01T00:00:01.500000000Z"
        );
    }

    #[test]
    fn test_float_rendering_round_trips() {
        let v = 1.0f64 / 3.0;
        let rendered = ColumnValue::Float64(v).to_string();
        assert_eq!(rendered.parse::<f64>().unwrap(), v);
    }

    #[test]
    fn test_as_nested() {
        let ctx = ColumnValue::String(
            r#"{"pod":"default/nginx","restarts":3,"ready":true,"labels":{"app":"web"},"node":null}"#
                .into(),
        );
        let members = ctx.as_nested().unwrap();

        assert!(members.contains(&("pod".into(), ColumnValue::String("default/nginx".into()))));
        assert!(members.contains(&("restarts".into(), ColumnValue::Int64(3))));
        assert!(members.contains(&("ready".into(), ColumnValue::Boolean(true))));
        assert!(members.contains(&("labels".into(), ColumnValue::String(r#"{"app":"web"}"#.into()))));
        assert!(!members.iter().any(|(name, _)| name == "node"));
    }

    #[test]
    fn test_as_nested_rejects_non_objects() {
        assert!(ColumnValue::String("nginx -g daemon off;".into()).as_nested().is_none());
        assert!(ColumnValue::String("[1,2]".into()).as_nested().is_none());
        assert!(ColumnValue::Int64(1).as_nested().is_none());
    }

    #[test]
    fn test_large_unsigned_json_numbers() {
        let value = ColumnValue::String(r#"{"big":18446744073709551615}"#.into());
        let members = value.as_nested().unwrap();
        assert_eq!(members[0].1, ColumnValue::UInt128(u64::MAX as u128));
    }
}
