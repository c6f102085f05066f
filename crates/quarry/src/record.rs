//! Dynamic row mapping between Postgres and [`Record`]s.
//!
//! Rows decode into insertion-ordered field maps so serialized output
//! keeps a stable column order, and [`SqlParam`] adapts [`Value`]
//! arguments back into the executor's `ToSql` world, coercing by the
//! parameter type the server inferred.

use crate::Error;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use quarry_sql::{Record, Value};
use rust_decimal::Decimal;
use std::error::Error as StdError;
use std::str::FromStr;
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type, WrongType};
use uuid::Uuid;

/// Internal type for reading raw JSON/JSONB bytes.
struct JsonRaw(Option<Vec<u8>>);

impl<'a> FromSql<'a> for JsonRaw {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        if *ty == Type::JSON || *ty == Type::JSONB {
            Ok(JsonRaw(Some(raw.to_vec())))
        } else {
            Err(format!("expected JSON or JSONB, got {ty:?}").into())
        }
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(JsonRaw(None))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::JSON || *ty == Type::JSONB
    }
}

/// Reads any enum (or otherwise text-shaped) value as a raw string.
struct EnumText(Option<String>);

impl<'a> FromSql<'a> for EnumText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(EnumText(Some(String::from_utf8(raw.to_vec())?)))
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(EnumText(None))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

/// Convert a Postgres row to a [`Record`], driven by the row's own
/// column set. The `table` name is only used for error context.
pub fn decode_row(row: &Row, table: &str) -> Result<Record, Error> {
    let mut record = Record::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_value(row, idx, table)?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

/// Extract one value from a row at a given index.
fn decode_value(row: &Row, idx: usize, table: &str) -> Result<Value, Error> {
    let column = &row.columns()[idx];
    let ty = column.type_();

    // A read failure is either a type mismatch (the database column no
    // longer matches what we tried to decode as) or some other
    // deserialization issue.
    let read_error = |expected: &'static str, e: tokio_postgres::Error| {
        if e.source()
            .and_then(|s| s.downcast_ref::<WrongType>())
            .is_some()
        {
            Error::TypeMismatch {
                table: table.to_string(),
                column: column.name().to_string(),
                expected,
                actual: ty.name().to_string(),
            }
        } else {
            Error::ColumnRead {
                table: table.to_string(),
                column: column.name().to_string(),
                expected,
                message: e.to_string(),
            }
        }
    };

    macro_rules! read {
        ($rust:ty, $expected:literal, $map:expr) => {{
            let v: Option<$rust> = row.try_get(idx).map_err(|e| read_error($expected, e))?;
            Ok(v.map($map).unwrap_or(Value::Null))
        }};
    }

    match *ty {
        Type::BOOL => read!(bool, "bool", Value::Bool),
        Type::INT2 => read!(i16, "smallint", Value::I16),
        Type::INT4 => read!(i32, "integer", Value::I32),
        Type::INT8 => read!(i64, "bigint", Value::I64),
        Type::OID => read!(u32, "oid", |v| Value::I64(v as i64)),
        Type::FLOAT4 => read!(f32, "real", Value::F32),
        Type::FLOAT8 => read!(f64, "double precision", Value::F64),
        Type::NUMERIC => read!(Decimal, "numeric", Value::Decimal),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            read!(String, "text", Value::String)
        }
        Type::BYTEA => read!(Vec<u8>, "bytea", Value::Bytes),
        Type::UUID => read!(Uuid, "uuid", Value::Uuid),
        Type::TIMESTAMPTZ => {
            read!(DateTime<Utc>, "timestamptz", |v| Value::String(
                v.to_rfc3339()
            ))
        }
        Type::TIMESTAMP => {
            read!(NaiveDateTime, "timestamp", |v| Value::String(v.to_string()))
        }
        Type::DATE => read!(NaiveDate, "date", |v| Value::String(v.to_string())),
        Type::TIME => read!(NaiveTime, "time", |v| Value::String(v.to_string())),
        Type::JSON | Type::JSONB => {
            let v: JsonRaw = row.try_get(idx).map_err(|e| read_error("json", e))?;
            match v.0 {
                Some(raw) => {
                    // JSONB wire format has a 1-byte version prefix, skip it
                    let bytes = if *ty == Type::JSONB && raw.first() == Some(&1) {
                        &raw[1..]
                    } else {
                        &raw[..]
                    };
                    Ok(Value::Json(String::from_utf8_lossy(bytes).into_owned()))
                }
                None => Ok(Value::Null),
            }
        }
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            read!(Vec<String>, "text[]", |v| Value::Array(
                v.into_iter().map(Value::String).collect()
            ))
        }
        Type::INT2_ARRAY => read!(Vec<i16>, "smallint[]", |v| Value::Array(
            v.into_iter().map(Value::I16).collect()
        )),
        Type::INT4_ARRAY => read!(Vec<i32>, "integer[]", |v| Value::Array(
            v.into_iter().map(Value::I32).collect()
        )),
        Type::INT8_ARRAY => read!(Vec<i64>, "bigint[]", |v| Value::Array(
            v.into_iter().map(Value::I64).collect()
        )),
        Type::FLOAT4_ARRAY => read!(Vec<f32>, "real[]", |v| Value::Array(
            v.into_iter().map(Value::F32).collect()
        )),
        Type::FLOAT8_ARRAY => read!(Vec<f64>, "double precision[]", |v| Value::Array(
            v.into_iter().map(Value::F64).collect()
        )),
        Type::BOOL_ARRAY => read!(Vec<bool>, "bool[]", |v| Value::Array(
            v.into_iter().map(Value::Bool).collect()
        )),
        Type::UUID_ARRAY => read!(Vec<Uuid>, "uuid[]", |v| Value::Array(
            v.into_iter().map(Value::Uuid).collect()
        )),
        Type::NUMERIC_ARRAY => read!(Vec<Decimal>, "numeric[]", |v| Value::Array(
            v.into_iter().map(Value::Decimal).collect()
        )),
        _ if matches!(ty.kind(), Kind::Enum(_)) => {
            let v: EnumText = row.try_get(idx).map_err(|e| read_error("enum", e))?;
            Ok(v.0.map(Value::String).unwrap_or(Value::Null))
        }
        _ => Err(Error::TypeMismatch {
            table: table.to_string(),
            column: column.name().to_string(),
            expected: "a supported column type",
            actual: ty.name().to_string(),
        }),
    }
}

/// Wrapper to make a [`Value`] usable as a `ToSql` parameter.
///
/// Dynamic requests carry looser types than the server infers for the
/// placeholders (a filter's `25` may target a SMALLINT column, a path
/// id string may target a UUID), so this adapter coerces by the target
/// type before delegating to the concrete `ToSql` impls.
#[derive(Debug)]
pub struct SqlParam<'a>(pub &'a Value);

/// Collect a `Value` slice into the `&dyn ToSql` form executors take.
pub fn sql_params(values: &[Value]) -> Vec<SqlParam<'_>> {
    values.iter().map(SqlParam).collect()
}

type ToSqlResult = Result<IsNull, Box<dyn StdError + Sync + Send>>;

impl ToSql for SqlParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut bytes::BytesMut) -> ToSqlResult {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => v.to_sql(ty, out),
            Value::I16(v) => int_to_sql(i64::from(*v), ty, out),
            Value::I32(v) => int_to_sql(i64::from(*v), ty, out),
            Value::I64(v) => int_to_sql(*v, ty, out),
            Value::F32(v) => float_to_sql(f64::from(*v), ty, out),
            Value::F64(v) => float_to_sql(*v, ty, out),
            Value::Decimal(v) => v.to_sql(ty, out),
            Value::String(v) => string_to_sql(v, ty, out),
            Value::Bytes(v) => v.to_sql(ty, out),
            Value::Uuid(v) => match *ty {
                Type::TEXT | Type::VARCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Json(v) => {
                // For JSONB, prepend the version byte
                if *ty == Type::JSONB {
                    out.extend_from_slice(&[1]);
                }
                out.extend_from_slice(v.as_bytes());
                Ok(IsNull::No)
            }
            Value::Array(_) | Value::Record(_) => {
                Err(format!("cannot bind a {:?} as a query argument", self.0).into())
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Acceptance depends on the runtime value, not just the type;
        // to_sql reports unbindable combinations itself.
        true
    }

    tokio_postgres::types::to_sql_checked!();
}

/// Bind an integer by the placeholder's inferred type.
fn int_to_sql(v: i64, ty: &Type, out: &mut bytes::BytesMut) -> ToSqlResult {
    match *ty {
        Type::INT2 => i16::try_from(v)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(v)?.to_sql(ty, out),
        Type::FLOAT4 => (v as f32).to_sql(ty, out),
        Type::FLOAT8 => (v as f64).to_sql(ty, out),
        Type::NUMERIC => Decimal::from(v).to_sql(ty, out),
        Type::OID => u32::try_from(v)?.to_sql(ty, out),
        _ => v.to_sql(ty, out),
    }
}

/// Bind a float by the placeholder's inferred type.
fn float_to_sql(v: f64, ty: &Type, out: &mut bytes::BytesMut) -> ToSqlResult {
    match *ty {
        Type::FLOAT4 => (v as f32).to_sql(ty, out),
        Type::NUMERIC => Decimal::try_from(v)?.to_sql(ty, out),
        _ => v.to_sql(ty, out),
    }
}

/// Bind a string by the placeholder's inferred type, parsing it when
/// the target isn't text-shaped.
fn string_to_sql(v: &str, ty: &Type, out: &mut bytes::BytesMut) -> ToSqlResult {
    match *ty {
        Type::UUID => Uuid::parse_str(v)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => {
            let parsed: DateTime<Utc> = DateTime::parse_from_rfc3339(v)?.with_timezone(&Utc);
            parsed.to_sql(ty, out)
        }
        Type::TIMESTAMP => NaiveDateTime::from_str(v)?.to_sql(ty, out),
        Type::DATE => NaiveDate::from_str(v)?.to_sql(ty, out),
        Type::TIME => NaiveTime::from_str(v)?.to_sql(ty, out),
        Type::NUMERIC => Decimal::from_str(v)?.to_sql(ty, out),
        Type::INT2 => i16::from_str(v)?.to_sql(ty, out),
        Type::INT4 => i32::from_str(v)?.to_sql(ty, out),
        Type::INT8 => i64::from_str(v)?.to_sql(ty, out),
        Type::FLOAT4 => f32::from_str(v)?.to_sql(ty, out),
        Type::FLOAT8 => f64::from_str(v)?.to_sql(ty, out),
        Type::BOOL => bool::from_str(v)?.to_sql(ty, out),
        Type::JSON | Type::JSONB => {
            if *ty == Type::JSONB {
                out.extend_from_slice(&[1]);
            }
            out.extend_from_slice(v.as_bytes());
            Ok(IsNull::No)
        }
        // Text, enums, domains over text: the wire format is the raw
        // string either way.
        _ => {
            out.extend_from_slice(v.as_bytes());
            Ok(IsNull::No)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_coercion_by_target_type() {
        let mut out = bytes::BytesMut::new();
        let v = Value::I64(25);
        let param = SqlParam(&v);

        // SMALLINT target gets 2 bytes, BIGINT 8.
        param.to_sql(&Type::INT2, &mut out).unwrap();
        assert_eq!(out.len(), 2);

        out.clear();
        param.to_sql(&Type::INT8, &mut out).unwrap();
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn test_int_overflow_is_reported() {
        let mut out = bytes::BytesMut::new();
        let v = Value::I64(100_000);
        assert!(SqlParam(&v).to_sql(&Type::INT2, &mut out).is_err());
    }

    #[test]
    fn test_string_parses_for_uuid_target() {
        let mut out = bytes::BytesMut::new();
        let v = Value::String("f81d4fae-7dec-11d0-a765-00a0c91e6bf6".to_string());
        SqlParam(&v).to_sql(&Type::UUID, &mut out).unwrap();
        assert_eq!(out.len(), 16);

        out.clear();
        let bad = Value::String("not-a-uuid".to_string());
        assert!(SqlParam(&bad).to_sql(&Type::UUID, &mut out).is_err());
    }

    #[test]
    fn test_null_binds_as_null() {
        let mut out = bytes::BytesMut::new();
        let v = Value::Null;
        assert!(matches!(
            SqlParam(&v).to_sql(&Type::TEXT, &mut out).unwrap(),
            IsNull::Yes
        ));
    }

    #[test]
    fn test_containers_do_not_bind() {
        let mut out = bytes::BytesMut::new();
        let v = Value::Array(vec![Value::I64(1)]);
        assert!(SqlParam(&v).to_sql(&Type::INT8, &mut out).is_err());
    }

    #[test]
    fn test_jsonb_version_byte() {
        let mut out = bytes::BytesMut::new();
        let v = Value::Json("{}".to_string());
        SqlParam(&v).to_sql(&Type::JSONB, &mut out).unwrap();
        assert_eq!(&out[..], &[1, b'{', b'}']);

        out.clear();
        SqlParam(&v).to_sql(&Type::JSON, &mut out).unwrap();
        assert_eq!(&out[..], b"{}");
    }
}
