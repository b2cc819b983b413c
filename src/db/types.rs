//! Postgres row to JSON conversion.
//!
//! Conversion is total: every column of every row becomes a JSON value.
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the column type by name
//! 2. a per-category decoder extracts the value
//!
//! Any decoder that cannot handle a value falls back to the server's text
//! form, then to lossy UTF-8 of the raw bytes. Reaching `null` through the
//! fallback path is logged as an error: it means a type is not covered.

use crate::models::JsonRow;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for Postgres column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Unknown,
}

/// Classify a Postgres type name into a logical category.
///
/// Names are matched exactly: `interval` or `point` must not be mistaken for
/// integers. Array, range, enum and other types are `Unknown` and use the
/// server's text form.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    match type_name.to_ascii_lowercase().as_str() {
        "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" => TypeCategory::Integer,
        "float4" | "float8" | "real" | "double precision" => TypeCategory::Float,
        "numeric" | "decimal" => TypeCategory::Decimal,
        "bool" | "boolean" => TypeCategory::Boolean,
        "text" | "varchar" | "bpchar" | "name" | "character varying" | "character" => {
            TypeCategory::Text
        }
        "bytea" => TypeCategory::Binary,
        "json" | "jsonb" => TypeCategory::Json,
        "date" => TypeCategory::Date,
        "time" => TypeCategory::Time,
        "timestamp" => TypeCategory::Timestamp,
        "timestamptz" => TypeCategory::TimestampTz,
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// NUMERIC value kept as its exact textual representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Scalar Conversions
// =============================================================================

/// Bytes as UTF-8 text, with invalid sequences replaced.
pub fn binary_to_json(bytes: &[u8]) -> JsonValue {
    JsonValue::String(String::from_utf8_lossy(bytes).into_owned())
}

/// Finite floats as JSON numbers; NaN and infinities as strings.
pub fn float_to_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

pub fn format_date(v: &NaiveDate) -> String {
    v.format("%Y-%m-%d").to_string()
}

pub fn format_time(v: &NaiveTime) -> String {
    v.format("%H:%M:%S%.f").to_string()
}

/// ISO-8601 without offset.
pub fn format_timestamp(v: &NaiveDateTime) -> String {
    v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

/// RFC 3339, normalized to UTC.
pub fn format_timestamptz(v: &DateTime<Utc>) -> String {
    v.to_rfc3339()
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    /// Column name to value, in result-set column order.
    fn to_json_map(&self) -> JsonRow;
    fn column_names(&self) -> Vec<String>;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> JsonRow {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                (col.name().to_string(), decode_column(self, idx, category))
            })
            .collect()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }
}

// =============================================================================
// Decoders
// =============================================================================

fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
    let decoded = match category {
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Decimal => {
            decode_as::<RawDecimal>(row, idx).map(|v| v.map(|d| JsonValue::String(d.0)))
        }
        TypeCategory::Boolean => decode_as::<bool>(row, idx).map(|v| v.map(JsonValue::Bool)),
        TypeCategory::Text => decode_as::<String>(row, idx).map(|v| v.map(JsonValue::String)),
        TypeCategory::Binary => {
            decode_as::<Vec<u8>>(row, idx).map(|v| v.map(|b| binary_to_json(&b)))
        }
        TypeCategory::Json => decode_as::<JsonValue>(row, idx),
        TypeCategory::Date => {
            decode_as::<NaiveDate>(row, idx).map(|v| v.map(|d| JsonValue::String(format_date(&d))))
        }
        TypeCategory::Time => {
            decode_as::<NaiveTime>(row, idx).map(|v| v.map(|t| JsonValue::String(format_time(&t))))
        }
        TypeCategory::Timestamp => decode_as::<NaiveDateTime>(row, idx)
            .map(|v| v.map(|t| JsonValue::String(format_timestamp(&t)))),
        TypeCategory::TimestampTz => decode_as::<DateTime<Utc>>(row, idx)
            .map(|v| v.map(|t| JsonValue::String(format_timestamptz(&t)))),
        TypeCategory::Unknown => None,
    };

    match decoded {
        Some(Some(value)) => value,
        Some(None) => JsonValue::Null,
        None => decode_fallback(row, idx),
    }
}

/// `Some(None)` for SQL NULL, `None` when the type does not decode.
fn decode_as<'r, T>(row: &'r PgRow, idx: usize) -> Option<Option<T>>
where
    T: Decode<'r, sqlx::Postgres> + Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(idx).ok()
}

fn decode_integer(row: &PgRow, idx: usize) -> Option<Option<JsonValue>> {
    if let Some(v) = decode_as::<i16>(row, idx) {
        return Some(v.map(|n| JsonValue::Number(n.into())));
    }
    if let Some(v) = decode_as::<i32>(row, idx) {
        return Some(v.map(|n| JsonValue::Number(n.into())));
    }
    decode_as::<i64>(row, idx).map(|v| v.map(|n| JsonValue::Number(n.into())))
}

fn decode_float(row: &PgRow, idx: usize) -> Option<Option<JsonValue>> {
    if let Some(v) = decode_as::<f64>(row, idx) {
        return Some(v.map(float_to_json));
    }
    decode_as::<f32>(row, idx).map(|v| v.map(|n| float_to_json(n as f64)))
}

/// Server text form, then lossy raw bytes, then `null` (logged).
fn decode_fallback(row: &PgRow, idx: usize) -> JsonValue {
    if let Ok(value) = row.try_get_unchecked::<Option<String>, _>(idx) {
        return value.map(JsonValue::String).unwrap_or(JsonValue::Null);
    }

    match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => JsonValue::Null,
        Ok(raw) => match raw.as_bytes() {
            Ok(bytes) => binary_to_json(bytes),
            Err(e) => {
                tracing::error!(column = idx, error = %e, "Failed to read raw column value");
                JsonValue::Null
            }
        },
        Err(e) => {
            tracing::error!(column = idx, error = %e, "Failed to access column");
            JsonValue::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INT4"), TypeCategory::Integer);
        assert_eq!(categorize_type("int8"), TypeCategory::Integer);
        assert_eq!(categorize_type("INT2"), TypeCategory::Integer);
    }

    #[test]
    fn test_categorize_type_does_not_match_substrings() {
        assert_eq!(categorize_type("INTERVAL"), TypeCategory::Unknown);
        assert_eq!(categorize_type("POINT"), TypeCategory::Unknown);
        assert_eq!(categorize_type("INT4[]"), TypeCategory::Unknown);
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(categorize_type("DATE"), TypeCategory::Date);
        assert_eq!(categorize_type("TIME"), TypeCategory::Time);
        assert_eq!(categorize_type("TIMESTAMP"), TypeCategory::Timestamp);
        assert_eq!(categorize_type("TIMESTAMPTZ"), TypeCategory::TimestampTz);
        assert_eq!(categorize_type("TIMETZ"), TypeCategory::Unknown);
    }

    #[test]
    fn test_categorize_type_other() {
        assert_eq!(categorize_type("NUMERIC"), TypeCategory::Decimal);
        assert_eq!(categorize_type("JSONB"), TypeCategory::Json);
        assert_eq!(categorize_type("BYTEA"), TypeCategory::Binary);
        assert_eq!(categorize_type("UUID"), TypeCategory::Unknown);
        assert_eq!(categorize_type("VARCHAR"), TypeCategory::Text);
    }

    #[test]
    fn test_binary_to_json_replaces_invalid_utf8() {
        assert_eq!(binary_to_json(b"hello"), JsonValue::String("hello".into()));
        assert_eq!(
            binary_to_json(&[0x61, 0xFF, 0x62]),
            JsonValue::String("a\u{FFFD}b".into())
        );
        assert_eq!(binary_to_json(&[]), JsonValue::String(String::new()));
    }

    #[test]
    fn test_float_to_json() {
        assert_eq!(float_to_json(1.5), serde_json::json!(1.5));
        assert_eq!(float_to_json(f64::NAN), JsonValue::String("NaN".into()));
        assert_eq!(float_to_json(f64::INFINITY), JsonValue::String("inf".into()));
    }

    #[test]
    fn test_temporal_formatting() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(format_date(&date), "2024-03-09");

        let ts = date.and_hms_milli_opt(14, 5, 7, 250).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-09T14:05:07.250");
        assert_eq!(format_time(&ts.time()), "14:05:07.250");

        let tz = DateTime::<Utc>::from_naive_utc_and_offset(ts, Utc);
        assert_eq!(format_timestamptz(&tz), "2024-03-09T14:05:07.250+00:00");
    }
}
