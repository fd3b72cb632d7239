//! Prepared-statement lifecycle: bind, step, column decode, reset, dispose.
//! `rusqlite::Statement` already resets between `execute`/`query` calls and
//! disposes the compiled handle on `Drop`, so the wrapper here layers a
//! value-marshaling contract on top of it rather than re-implementing
//! step-by-step iteration over the raw FFI.

use crate::descriptor::TableDescriptor;
use crate::error::{OrmError, Result};
use crate::value::SqlValue;
use rusqlite::ToSql;
use std::collections::HashMap;

/// A compiled, parameterized statement bound to one connection.
pub struct PreparedStatement<'conn> {
    inner: rusqlite::Statement<'conn>,
    sql_text: String,
}

impl<'conn> PreparedStatement<'conn> {
    /// Compile `sql` against `conn`, keeping the source text alongside the
    /// compiled handle for diagnostics.
    pub fn prepare(conn: &'conn rusqlite::Connection, sql: &str) -> Result<Self> {
        let inner = conn.prepare(sql)?;
        Ok(Self {
            inner,
            sql_text: sql.to_string(),
        })
    }

    #[must_use]
    pub fn sql_text(&self) -> &str {
        &self.sql_text
    }

    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.inner.parameter_count()
    }

    fn check_params(&self, params: &[SqlValue]) -> Result<()> {
        if params.len() != self.parameter_count() {
            return Err(OrmError::InvalidArgument(format!(
                "statement expects {} parameter(s), got {}",
                self.parameter_count(),
                params.len()
            )));
        }
        Ok(())
    }

    fn to_sql_refs(params: &[SqlValue]) -> Vec<&dyn ToSql> {
        params.iter().map(|p| p as &dyn ToSql).collect()
    }

    /// Step to completion, returning the affected-row count.
    pub fn execute_non_query(&mut self, params: &[SqlValue]) -> Result<i64> {
        self.check_params(params)?;
        let refs = Self::to_sql_refs(params);
        let affected = self.inner.execute(refs.as_slice())?;
        Ok(i64::try_from(affected).unwrap_or(i64::MAX))
    }

    /// Step once; decode column 0 of the first row, or `T::default()` if
    /// there was no row.
    pub fn execute_scalar<T: FromSqlValue + Default>(&mut self, params: &[SqlValue]) -> Result<T> {
        self.check_params(params)?;
        let refs = Self::to_sql_refs(params);
        let mut rows = self.inner.query(refs.as_slice())?;
        if let Some(row) = rows.next()? {
            let value: SqlValue = row.get_ref(0)?.into();
            T::from_sql_value(&value)
        } else {
            Ok(T::default())
        }
    }

    /// Step through every result row, mapping each to a record with
    /// `map_row`.
    pub fn execute_query<T>(
        &mut self,
        params: &[SqlValue],
        mut map_row: impl FnMut(&RowView<'_>) -> Result<T>,
    ) -> Result<Vec<T>> {
        self.check_params(params)?;
        let refs = Self::to_sql_refs(params);
        let mut rows = self.inner.query(refs.as_slice())?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let view = RowView { row };
            out.push(map_row(&view)?);
        }
        Ok(out)
    }
}

/// A thin, column-name-addressable view over a `rusqlite::Row`.
pub struct RowView<'a> {
    row: &'a rusqlite::Row<'a>,
}

impl<'a> RowView<'a> {
    pub(crate) fn from_row(row: &'a rusqlite::Row<'a>) -> Self {
        Self { row }
    }

    pub fn get(&self, index: usize) -> Result<SqlValue> {
        Ok(self.row.get_ref(index)?.into())
    }

    pub fn get_by_name(&self, name: &str) -> Result<SqlValue> {
        Ok(self.row.get_ref(name)?.into())
    }

    pub(crate) fn statement(&self) -> &rusqlite::Statement<'a> {
        self.row.as_ref()
    }
}

/// Decode a column 0 value into a concrete scalar type for
/// `execute_scalar`.
pub trait FromSqlValue: Sized {
    fn from_sql_value(value: &SqlValue) -> Result<Self>;
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        value.as_i64()
    }
}
impl FromSqlValue for f64 {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        value.as_f64()
    }
}
impl FromSqlValue for bool {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        if value.is_null() {
            return Ok(false);
        }
        value.as_bool()
    }
}
impl FromSqlValue for String {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::new());
        }
        value.as_str().map(str::to_string)
    }
}
impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            Ok(Some(T::from_sql_value(value)?))
        }
    }
}

/// Decode every column of `descriptor` out of `row` into `record`, resolving
/// each column's name to a result-column index through `cache` rather than
/// re-resolving it by name on every row a caller decodes.
///
/// A `NULL` column decoded into a non-nullable field is a
/// [`OrmError::DataIntegrity`] error, unless the column itself is declared
/// nullable.
pub fn decode_row_into(
    row: &RowView<'_>,
    descriptor: &TableDescriptor,
    record: &mut dyn crate::descriptor::Record,
    cache: &mut ColumnIndexCache,
) -> Result<()> {
    for column in &descriptor.columns {
        let idx = cache.resolve(row.statement(), &column.name)?;
        let value = row.get(idx)?;
        if value.is_null() && !column.is_nullable {
            return Err(OrmError::DataIntegrity(format!(
                "column {} is NOT NULL but decoded NULL",
                column.name
            )));
        }
        (column.set)(record, value);
    }
    Ok(())
}

/// Cache of descriptor-column-name → result-column-index, built once per
/// query shape and reused across every row [`decode_row_into`] decodes for
/// that query, instead of re-resolving each column by name per row.
#[derive(Debug, Default)]
pub struct ColumnIndexCache {
    indices: HashMap<String, usize>,
}

impl ColumnIndexCache {
    pub fn resolve(&mut self, stmt: &rusqlite::Statement<'_>, column_name: &str) -> Result<usize> {
        if let Some(&idx) = self.indices.get(column_name) {
            return Ok(idx);
        }
        let idx = stmt.column_index(column_name).map_err(|_| {
            OrmError::DataIntegrity(format!("column {column_name} not present in result set"))
        })?;
        self.indices.insert(column_name.to_string(), idx);
        Ok(idx)
    }
}
