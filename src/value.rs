//! Heterogeneous value representation bound into and decoded out of
//! prepared statement parameter slots.

use crate::error::{OrmError, Result};
use rusqlite::types::{ToSqlOutput, Value as SqliteValue, ValueRef};
use rusqlite::ToSql;

/// How a [`crate::descriptor::ColumnDescriptor`] stores date/time and
/// decimal values: ISO-8601 text or Unix ticks, configurable once per
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateTimeStorage {
    #[default]
    Iso8601Text,
    UnixTicks,
}

/// A value bound into a parameter slot or decoded from a result column.
///
/// Covers every storage family this crate binds or decodes: integer
/// (signed/unsigned 8/16/32/64), floating point (32/64), text, blob,
/// boolean, date/time, decimal/money (as text, to preserve precision),
/// enumerations (integer or text), and null.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Decode an integer column into `bool`: `value != 0`.
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Self::Integer(v) => Ok(*v != 0),
            Self::Null => Err(OrmError::DataIntegrity(
                "expected integer for bool, found NULL".to_string(),
            )),
            other => Err(OrmError::DataIntegrity(format!(
                "expected integer for bool, found {other:?}"
            ))),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Self::Integer(v) => Ok(*v),
            other => Err(OrmError::DataIntegrity(format!(
                "expected integer, found {other:?}"
            ))),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Self::Real(v) => Ok(*v),
            Self::Integer(v) => Ok(*v as f64),
            other => Err(OrmError::DataIntegrity(format!(
                "expected real, found {other:?}"
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Self::Text(v) => Ok(v.as_str()),
            other => Err(OrmError::DataIntegrity(format!(
                "expected text, found {other:?}"
            ))),
        }
    }

    pub fn as_blob(&self) -> Result<&[u8]> {
        match self {
            Self::Blob(v) => Ok(v.as_slice()),
            other => Err(OrmError::DataIntegrity(format!(
                "expected blob, found {other:?}"
            ))),
        }
    }
}

impl From<SqliteValue> for SqlValue {
    fn from(v: SqliteValue) -> Self {
        match v {
            SqliteValue::Null => Self::Null,
            SqliteValue::Integer(i) => Self::Integer(i),
            SqliteValue::Real(r) => Self::Real(r),
            SqliteValue::Text(t) => Self::Text(t),
            SqliteValue::Blob(b) => Self::Blob(b),
        }
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(v: ValueRef<'_>) -> Self {
        SqliteValue::from(v).into()
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::from(rusqlite::types::Null),
            Self::Integer(i) => ToSqlOutput::from(*i),
            Self::Real(r) => ToSqlOutput::from(*r),
            Self::Text(t) => ToSqlOutput::from(t.as_str()),
            Self::Blob(b) => ToSqlOutput::from(b.as_slice()),
        })
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),+) => {
        $(impl From<$t> for SqlValue {
            fn from(v: $t) -> Self { Self::Integer(i64::from(v)) }
        })+
    };
}
impl_from_signed!(i8, i16, i32, i64);

macro_rules! impl_from_unsigned {
    ($($t:ty),+) => {
        $(impl From<$t> for SqlValue {
            fn from(v: $t) -> Self { Self::Integer(i64::from(v)) }
        })+
    };
}
impl_from_unsigned!(u8, u16, u32);

impl From<u64> for SqlValue {
    /// Fallible in spirit: values beyond `i64::MAX` lose their top bit the
    /// way SQLite's native 64-bit integer column always has. Binding relies
    /// on rusqlite's `fallible_uint` feature at the statement layer for a
    /// checked conversion; this constructor is for values already known to
    /// fit.
    fn from(v: u64) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        Self::Real(f64::from(v))
    }
}
impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}
impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Integer(i64::from(v))
    }
}
impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}
impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}
impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}
impl<T: Into<Self>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for SqlValue {
    fn from(v: chrono::DateTime<chrono::Utc>) -> Self {
        Self::Text(v.to_rfc3339())
    }
}

impl TryFrom<&SqlValue> for chrono::DateTime<chrono::Utc> {
    type Error = OrmError;

    /// Decode a date/time column using the connection's configured format:
    /// text parses as RFC3339, an integer is read as Unix ticks.
    fn try_from(v: &SqlValue) -> Result<Self> {
        match v {
            SqlValue::Text(t) => chrono::DateTime::parse_from_rfc3339(t)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|e| OrmError::DataIntegrity(format!("invalid ISO-8601 datetime: {e}"))),
            SqlValue::Integer(ticks) => chrono::DateTime::from_timestamp(*ticks, 0)
                .ok_or_else(|| OrmError::DataIntegrity(format!("invalid unix ticks: {ticks}"))),
            other => Err(OrmError::DataIntegrity(format!(
                "expected date/time text or ticks, found {other:?}"
            ))),
        }
    }
}
