//! Insert/Update/Delete/Upsert pipeline: renders one SQL template per
//! `(record type, operation)` pair via the connection's template cache,
//! binds the descriptor's columns, and classifies any constraint failure
//! into the error taxonomy. Many-to-many children are written through
//! [`crate::descriptor::RelationSpec`] after the owning row's write
//! succeeds.

use crate::descriptor::{ColumnDescriptor, Record, TableDescriptor};
use crate::error::{ExtendedCode, OrmError, Result};
use crate::orm::connection::Connection;
use crate::orm::notify::ChangeAction;
use crate::orm::statement::{decode_row_into, ColumnIndexCache};
use crate::value::SqlValue;
use std::any::TypeId;

fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

fn render_insert(descriptor: &TableDescriptor, columns: &[&ColumnDescriptor]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&descriptor.table_name));
    }
    let names = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(",");
    let placeholders = (1..=columns.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(",");
    format!(
        "INSERT INTO {}({}) VALUES ({})",
        quote_ident(&descriptor.table_name),
        names,
        placeholders
    )
}

fn render_update(descriptor: &TableDescriptor, columns: &[&ColumnDescriptor], pk: &ColumnDescriptor) -> String {
    let assignments = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote_ident(&c.name), i + 1))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote_ident(&descriptor.table_name),
        assignments,
        quote_ident(&pk.name),
        columns.len() + 1
    )
}

fn render_insert_or_replace(descriptor: &TableDescriptor, columns: &[&ColumnDescriptor]) -> String {
    let names = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(",");
    let placeholders = (1..=columns.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(",");
    format!(
        "INSERT OR REPLACE INTO {}({}) VALUES ({})",
        quote_ident(&descriptor.table_name),
        names,
        placeholders
    )
}

fn render_delete(descriptor: &TableDescriptor, pk: &ColumnDescriptor) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote_ident(&descriptor.table_name),
        quote_ident(&pk.name)
    )
}

fn render_find(descriptor: &TableDescriptor, pk: &ColumnDescriptor) -> String {
    let names = descriptor
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "SELECT {names} FROM {} WHERE {} = ?1",
        quote_ident(&descriptor.table_name),
        quote_ident(&pk.name)
    )
}

fn render_upsert(descriptor: &TableDescriptor, columns: &[&ColumnDescriptor], pk: &ColumnDescriptor) -> String {
    let insert = render_insert(descriptor, columns);
    let non_pk_assignments = columns
        .iter()
        .filter(|c| !c.is_primary_key)
        .map(|c| format!("{0} = excluded.{0}", quote_ident(&c.name)))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{insert} ON CONFLICT({}) DO UPDATE SET {non_pk_assignments}",
        quote_ident(&pk.name)
    )
}

/// An invariant violation: [`TableDescriptor::validate`] should already
/// have rejected an auto-increment column without a primary key, so
/// reaching this is a descriptor bug rather than a normal runtime
/// condition.
fn missing_primary_key(descriptor: &TableDescriptor) -> OrmError {
    OrmError::Schema(format!(
        "table {} has no primary key column",
        descriptor.table_name
    ))
}

/// Update/delete/upsert all address a row by primary key; a PK-less
/// descriptor can't support them.
fn requires_primary_key(descriptor: &TableDescriptor, operation: &str) -> OrmError {
    OrmError::UnsupportedOperation(format!(
        "{operation} requires a primary key column on table {}",
        descriptor.table_name
    ))
}

/// Translate a constraint-class [`OrmError::Engine`] into the precise
/// taxonomy variant this crate's error type describes; every other error
/// passes through unchanged.
///
/// SQLite's own NOT NULL message names only the single column it happened
/// to check first, so a statement binding two NULLs into two NOT NULL
/// columns can't be classified from the engine message alone. Instead,
/// the full set of violated columns is computed from the statement's own
/// bound values: every `(column, value)` pair where the column is
/// non-nullable and the bound value is `SqlValue::Null`.
fn classify_constraint(err: OrmError, columns: &[&ColumnDescriptor], params: &[SqlValue]) -> OrmError {
    let OrmError::Engine { code, message } = &err else {
        return err;
    };
    match code {
        ExtendedCode::ConstraintNotNull => OrmError::NotNullConstraintViolation {
            columns: violated_not_null_columns(columns, params),
        },
        ExtendedCode::ConstraintUnique
        | ExtendedCode::ConstraintForeignKey
        | ExtendedCode::ConstraintCheck
        | ExtendedCode::ConstraintOther => OrmError::Constraint {
            message: message.clone(),
            code: *code,
        },
        _ => err,
    }
}

/// Every column of `columns` whose paired value in `params` is null despite
/// the column being declared `NOT NULL`.
fn violated_not_null_columns(columns: &[&ColumnDescriptor], params: &[SqlValue]) -> Vec<String> {
    columns
        .iter()
        .zip(params)
        .filter(|(c, v)| !c.is_nullable && v.is_null())
        .map(|(c, _)| c.name.clone())
        .collect()
}

fn bind_columns(columns: &[&ColumnDescriptor], record: &dyn Record) -> Vec<SqlValue> {
    columns.iter().map(|c| (c.get)(record)).collect()
}

fn write_children(conn: &Connection, descriptor: &TableDescriptor, record: &dyn Record) -> Result<()> {
    for relation in &descriptor.relations {
        relation.write_children(conn.raw(), record)?;
    }
    Ok(())
}

/// Insert `record`, writing the generated auto-increment primary key back
/// into it. Fans out to every [`TableDescriptor`] relation afterward.
pub fn insert<T: Record>(conn: &Connection, descriptor: &TableDescriptor, record: &mut T) -> Result<i64> {
    conn.ensure_schema(descriptor)?;
    let columns = descriptor.insert_columns();
    let sql = conn.cached_template(TypeId::of::<T>(), "insert", || render_insert(descriptor, &columns));
    let params = bind_columns(&columns, &*record);

    let affected = conn
        .execute_non_query(&sql, &params)
        .map_err(|err| classify_constraint(err, &columns, &params))?;

    if descriptor.has_auto_inc_pk {
        let pk = descriptor.primary_key().ok_or_else(|| missing_primary_key(descriptor))?;
        let rowid = conn.raw().last_insert_rowid();
        (pk.set)(record, SqlValue::Integer(rowid));
    }

    conn.notify_change(&descriptor.table_name, ChangeAction::Insert, affected);
    write_children(conn, descriptor, &*record)?;
    Ok(affected)
}

/// Look up the row with the given primary key value, decoding it into a
/// fresh `T`. Returns `None` if no row matches.
pub fn find<T: Record + Default>(conn: &Connection, descriptor: &TableDescriptor, pk_value: SqlValue) -> Result<Option<T>> {
    conn.ensure_schema(descriptor)?;
    let pk = descriptor.primary_key().ok_or_else(|| requires_primary_key(descriptor, "find"))?;
    let sql = conn.cached_template(TypeId::of::<T>(), "find", || render_find(descriptor, pk));

    let mut cache = ColumnIndexCache::default();
    let mut rows = conn.query(&sql, &[pk_value], |row| {
        let mut record = T::default();
        decode_row_into(row, descriptor, &mut record, &mut cache)?;
        Ok(record)
    })?;
    Ok(rows.pop())
}

/// Insert `record`, replacing any existing row whose primary key collides.
/// `OR REPLACE` binds every column, including the primary key, so leaves
/// exactly one row under that key rather than raising a constraint error.
pub fn insert_or_replace<T: Record>(conn: &Connection, descriptor: &TableDescriptor, record: &mut T) -> Result<i64> {
    conn.ensure_schema(descriptor)?;
    let columns = descriptor.columns.iter().collect::<Vec<_>>();
    let sql = conn.cached_template(TypeId::of::<T>(), "insert_or_replace", || {
        render_insert_or_replace(descriptor, &columns)
    });
    let params = bind_columns(&columns, &*record);

    let affected = conn
        .execute_non_query(&sql, &params)
        .map_err(|err| classify_constraint(err, &columns, &params))?;

    if descriptor.has_auto_inc_pk {
        let pk = descriptor.primary_key().ok_or_else(|| missing_primary_key(descriptor))?;
        if (pk.get)(&*record).as_i64().unwrap_or(0) == 0 {
            let rowid = conn.raw().last_insert_rowid();
            (pk.set)(record, SqlValue::Integer(rowid));
        }
    }

    conn.notify_change(&descriptor.table_name, ChangeAction::Insert, affected);
    write_children(conn, descriptor, &*record)?;
    Ok(affected)
}

/// Update every non-primary-key column of `record` by its primary key
/// value. A table with only a PK column has no non-PK column to set; fall
/// back to updating every column (including the PK) so the statement stays
/// syntactically valid — a no-op on values.
pub fn update<T: Record>(conn: &Connection, descriptor: &TableDescriptor, record: &T) -> Result<i64> {
    conn.ensure_schema(descriptor)?;
    let pk = descriptor.primary_key().ok_or_else(|| requires_primary_key(descriptor, "update"))?;
    let non_pk = descriptor.non_pk_columns();
    let columns = if non_pk.is_empty() {
        descriptor.columns.iter().collect::<Vec<_>>()
    } else {
        non_pk
    };
    let sql = conn.cached_template(TypeId::of::<T>(), "update", || render_update(descriptor, &columns, pk));

    let mut params = bind_columns(&columns, record);
    params.push((pk.get)(record));

    let affected = conn
        .execute_non_query(&sql, &params)
        .map_err(|err| classify_constraint(err, &columns, &params))?;

    conn.notify_change(&descriptor.table_name, ChangeAction::Update, affected);
    write_children(conn, descriptor, record)?;
    Ok(affected)
}

/// Delete the row with `record`'s primary key value.
pub fn delete<T: Record>(conn: &Connection, descriptor: &TableDescriptor, record: &T) -> Result<i64> {
    conn.ensure_schema(descriptor)?;
    let pk = descriptor.primary_key().ok_or_else(|| requires_primary_key(descriptor, "delete"))?;
    let sql = conn.cached_template(TypeId::of::<T>(), "delete", || render_delete(descriptor, pk));

    let params = [(pk.get)(record)];
    let affected = conn.execute_non_query(&sql, &params)?;

    conn.notify_change(&descriptor.table_name, ChangeAction::Delete, affected);
    Ok(affected)
}

/// Insert `record`, or update it in place if its primary key already
/// exists (`INSERT ... ON CONFLICT(pk) DO UPDATE`). An auto-increment
/// primary key of `0`/unset is written back the same way [`insert`] does;
/// an already-assigned key is left untouched.
pub fn upsert<T: Record>(conn: &Connection, descriptor: &TableDescriptor, record: &mut T) -> Result<i64> {
    conn.ensure_schema(descriptor)?;
    let pk = descriptor.primary_key().ok_or_else(|| requires_primary_key(descriptor, "upsert"))?;
    let columns = descriptor.insert_columns();
    let sql = conn.cached_template(TypeId::of::<T>(), "upsert", || render_upsert(descriptor, &columns, pk));
    let params = bind_columns(&columns, &*record);

    let affected = conn
        .execute_non_query(&sql, &params)
        .map_err(|err| classify_constraint(err, &columns, &params))?;

    if descriptor.has_auto_inc_pk && (pk.get)(&*record).as_i64().unwrap_or(0) == 0 {
        let rowid = conn.raw().last_insert_rowid();
        (pk.set)(record, SqlValue::Integer(rowid));
    }

    conn.notify_change(&descriptor.table_name, ChangeAction::Upsert, affected);
    write_children(conn, descriptor, &*record)?;
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenOptions;
    use crate::descriptor::StorageType;
    use crate::descriptor::builder::{ColumnSpec, TableDescriptorBuilder};
    use tempfile::NamedTempFile;

    #[derive(Default)]
    struct Widget {
        id: i64,
        name: String,
    }

    fn widget_descriptor() -> TableDescriptor {
        TableDescriptorBuilder::new("widgets")
            .column(
                ColumnSpec::new::<Widget, _, _>(
                    "id",
                    StorageType::Integer,
                    |w: &Widget| SqlValue::from(w.id),
                    |w: &mut Widget, v: SqlValue| w.id = v.as_i64().unwrap(),
                )
                .primary_key()
                .auto_increment(),
            )
            .column(
                ColumnSpec::new::<Widget, _, _>(
                    "name",
                    StorageType::Text,
                    |w: &Widget| SqlValue::from(w.name.clone()),
                    |w: &mut Widget, v: SqlValue| w.name = v.as_str().unwrap().to_string(),
                )
                .not_null(),
            )
            .build()
            .unwrap()
    }

    fn open_conn() -> (NamedTempFile, Connection) {
        let file = NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path(), &OpenOptions::default()).unwrap();
        (file, conn)
    }

    #[test]
    fn insert_writes_back_the_generated_primary_key() {
        let (_file, conn) = open_conn();
        let descriptor = widget_descriptor();
        let mut widget = Widget { id: 0, name: "bolt".to_string() };

        let affected = insert(&conn, &descriptor, &mut widget).unwrap();
        assert_eq!(affected, 1);
        assert!(widget.id > 0);
    }

    #[test]
    fn find_returns_the_inserted_row_and_none_after_delete() {
        let (_file, conn) = open_conn();
        let descriptor = widget_descriptor();
        let mut widget = Widget { id: 0, name: "bolt".to_string() };
        insert(&conn, &descriptor, &mut widget).unwrap();

        let found: Widget = find(&conn, &descriptor, SqlValue::from(widget.id)).unwrap().unwrap();
        assert_eq!(found.name, "bolt");

        delete(&conn, &descriptor, &widget).unwrap();
        assert!(find::<Widget>(&conn, &descriptor, SqlValue::from(widget.id)).unwrap().is_none());
    }

    #[test]
    fn update_then_delete_round_trip() {
        let (_file, conn) = open_conn();
        let descriptor = widget_descriptor();
        let mut widget = Widget { id: 0, name: "bolt".to_string() };
        insert(&conn, &descriptor, &mut widget).unwrap();

        widget.name = "nut".to_string();
        let updated = update(&conn, &descriptor, &widget).unwrap();
        assert_eq!(updated, 1);

        let deleted = delete(&conn, &descriptor, &widget).unwrap();
        assert_eq!(deleted, 1);

        let deleted_again = delete(&conn, &descriptor, &widget).unwrap();
        assert_eq!(deleted_again, 0);
    }

    #[test]
    fn insert_or_replace_on_pk_collision_leaves_one_row() {
        let (_file, conn) = open_conn();
        let descriptor = widget_descriptor();
        let mut widget = Widget { id: 0, name: "bolt".to_string() };
        insert(&conn, &descriptor, &mut widget).unwrap();

        let mut replacement = Widget { id: widget.id, name: "washer".to_string() };
        insert_or_replace(&conn, &descriptor, &mut replacement).unwrap();

        let count: i64 = conn.execute_scalar("SELECT COUNT(*) FROM widgets", &[]).unwrap();
        assert_eq!(count, 1);
        let name: String = conn
            .execute_scalar("SELECT name FROM widgets WHERE id = ?1", &[SqlValue::from(widget.id)])
            .unwrap();
        assert_eq!(name, "washer");
    }

    #[test]
    fn update_on_pk_only_table_is_a_syntactically_valid_no_op() {
        let (_file, conn) = open_conn();
        let descriptor = counter_descriptor();
        let mut counter = Counter { id: 0 };
        insert(&conn, &descriptor, &mut counter).unwrap();

        let affected = update(&conn, &descriptor, &counter).unwrap();
        assert_eq!(affected, 1);
    }

    #[test]
    fn upsert_inserts_then_updates_in_place() {
        let (_file, conn) = open_conn();
        let descriptor = widget_descriptor();
        let mut widget = Widget { id: 0, name: "bolt".to_string() };

        upsert(&conn, &descriptor, &mut widget).unwrap();
        let id_after_insert = widget.id;

        widget.name = "washer".to_string();
        upsert(&conn, &descriptor, &mut widget).unwrap();
        assert_eq!(widget.id, id_after_insert);

        let name: String = conn
            .execute_scalar("SELECT name FROM widgets WHERE id = ?1", &[SqlValue::from(widget.id)])
            .unwrap();
        assert_eq!(name, "washer");
    }

    #[test]
    fn not_null_violation_is_classified() {
        let (_file, conn) = open_conn();
        let descriptor = widget_descriptor();
        conn.ensure_schema(&descriptor).unwrap();

        let columns: Vec<&ColumnDescriptor> = descriptor.columns.iter().collect();
        let params = vec![SqlValue::from(1i64), SqlValue::Null];
        let err = conn
            .execute_non_query("INSERT INTO widgets (id, name) VALUES (1, NULL)", &[])
            .map_err(|e| classify_constraint(e, &columns, &params))
            .unwrap_err();
        match err {
            OrmError::NotNullConstraintViolation { columns } => {
                assert_eq!(columns, vec!["name".to_string()]);
            }
            other => panic!("expected NotNullConstraintViolation, got {other:?}"),
        }
    }

    struct Counter {
        id: i64,
    }

    fn counter_descriptor() -> TableDescriptor {
        TableDescriptorBuilder::new("counters")
            .column(
                ColumnSpec::new::<Counter, _, _>(
                    "id",
                    StorageType::Integer,
                    |c: &Counter| SqlValue::from(c.id),
                    |c: &mut Counter, v: SqlValue| c.id = v.as_i64().unwrap(),
                )
                .primary_key()
                .auto_increment(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn insert_on_pk_only_table_uses_default_values() {
        let (_file, conn) = open_conn();
        let descriptor = counter_descriptor();
        let mut counter = Counter { id: 0 };

        insert(&conn, &descriptor, &mut counter).unwrap();
        assert!(counter.id > 0);
    }

    struct NoPk {
        value: i64,
    }

    #[test]
    fn update_without_primary_key_is_unsupported() {
        let (_file, conn) = open_conn();
        let descriptor = TableDescriptorBuilder::new("no_pk")
            .column(ColumnSpec::new::<NoPk, _, _>(
                "value",
                StorageType::Integer,
                |n: &NoPk| SqlValue::from(n.value),
                |n: &mut NoPk, v: SqlValue| n.value = v.as_i64().unwrap(),
            ))
            .build()
            .unwrap();
        let record = NoPk { value: 1 };

        let err = update(&conn, &descriptor, &record).unwrap_err();
        assert!(matches!(err, OrmError::UnsupportedOperation(_)));
    }
}
