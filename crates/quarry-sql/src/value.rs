//! Runtime values for query arguments and dynamic rows.

use indexmap::IndexMap;
use rust_decimal::Decimal;
use uuid::Uuid;

/// A dynamic row: field name to value, preserving insertion order so
/// serialized output keeps a stable column order.
pub type Record = IndexMap<String, Value>;

/// A runtime SQL value.
///
/// Used both for query arguments and for decoded row data. Scalar
/// variants map to Postgres types; [`Value::Array`] and
/// [`Value::Record`] carry decoded array columns and nested expansion
/// results, and are never bound as query arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL
    Null,

    /// Boolean
    Bool(bool),

    /// 16-bit signed integer (SMALLINT)
    I16(i16),

    /// 32-bit signed integer (INTEGER)
    I32(i32),

    /// 64-bit signed integer (BIGINT)
    I64(i64),

    /// 32-bit float (REAL)
    F32(f32),

    /// 64-bit float (DOUBLE PRECISION)
    F64(f64),

    /// Decimal (NUMERIC)
    Decimal(Decimal),

    /// Text (TEXT, VARCHAR, enums, formatted timestamps)
    String(String),

    /// Binary data (BYTEA)
    Bytes(Vec<u8>),

    /// UUID
    Uuid(Uuid),

    /// JSON/JSONB data (stored as a JSON string for dynamic use)
    Json(String),

    /// An array column's elements.
    Array(Vec<Value>),

    /// A nested record, used for expanded relationships.
    Record(Record),
}

impl Value {
    /// Returns true if this is a NULL value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the value as a record, if it is one.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Returns the value as a mutable record, if it is one.
    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }
}

// Convenient From impls
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::I16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_null() {
        assert!(Value::Null.is_null());
        assert!(!Value::Bool(false).is_null());
    }

    #[test]
    fn test_option_from() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(7i64)), Value::I64(7));
    }

    #[test]
    fn test_record_accessors() {
        let mut v = Value::Record(Record::new());
        v.as_record_mut()
            .unwrap()
            .insert("name".to_string(), Value::from("ada"));
        assert_eq!(
            v.as_record().unwrap().get("name"),
            Some(&Value::String("ada".to_string()))
        );
        assert!(Value::Null.as_record().is_none());
    }
}
