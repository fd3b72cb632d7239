//! Schema Mapper: derives `CREATE TABLE`/`CREATE INDEX` SQL from a
//! [`TableDescriptor`]. Table creation is idempotent (`IF NOT EXISTS`); the
//! derivation itself is memoized per descriptor by the
//! [`crate::orm::connection::Connection`] that calls it.

use crate::descriptor::{ColumnDescriptor, TableDescriptor};
use crate::error::{OrmError, Result};
use std::collections::HashMap;

/// Outcome of [`create_table`]: whether the table existed before this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    Created,
    Migrated,
}

/// Quote a SQL identifier the way the mapper does everywhere: always
/// double-quoted.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

/// Build the `CREATE TABLE IF NOT EXISTS` statement for a descriptor.
#[must_use]
pub fn create_table_sql(descriptor: &TableDescriptor) -> String {
    let columns = descriptor
        .columns
        .iter()
        .map(ColumnDescriptor::sql_declaration)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS {}({})",
        quote_ident(&descriptor.table_name),
        columns
    )
}

/// Resolve each column's index participation into named, ordered
/// `CREATE [UNIQUE] INDEX` statements.
///
/// # Errors
///
/// Returns [`OrmError::Schema`] if two columns sharing an index name
/// disagree on uniqueness.
pub fn create_index_sql(descriptor: &TableDescriptor) -> Result<Vec<String>> {
    struct Group<'a> {
        columns: Vec<(&'a ColumnDescriptor, u32)>,
        unique: Option<bool>,
    }

    let mut groups: HashMap<String, Group<'_>> = HashMap::new();

    for column in &descriptor.columns {
        for participation in &column.indices {
            let name = participation
                .index_name
                .clone()
                .unwrap_or_else(|| format!("{}_{}", descriptor.table_name, column.name));

            let group = groups.entry(name.clone()).or_insert_with(|| Group {
                columns: Vec::new(),
                unique: None,
            });

            match group.unique {
                None => group.unique = Some(participation.unique),
                Some(existing) if existing != participation.unique => {
                    return Err(OrmError::Schema(format!(
                        "index {name}: participating columns disagree on uniqueness"
                    )));
                }
                Some(_) => {}
            }
            group.columns.push((column, participation.order));
        }
    }

    let mut names: Vec<&String> = groups.keys().collect();
    names.sort();

    let mut statements = Vec::with_capacity(names.len());
    for name in names {
        let group = &groups[name];
        let mut cols = group.columns.clone();
        cols.sort_by_key(|(_, order)| *order);
        let col_list = cols
            .iter()
            .map(|(c, _)| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(",");
        let unique = if group.unique.unwrap_or(false) {
            "UNIQUE "
        } else {
            ""
        };
        statements.push(format!(
            "CREATE {unique}INDEX IF NOT EXISTS {} ON {}({})",
            quote_ident(name),
            quote_ident(&descriptor.table_name),
            col_list
        ));
    }
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::builder::{ColumnSpec, TableDescriptorBuilder};
    use crate::descriptor::StorageType;
    use crate::value::SqlValue;

    struct Widget {
        id: i64,
        name: String,
        sku: String,
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
                .not_null()
                .indexed(None, 0, false),
            )
            .column(
                ColumnSpec::new::<Widget, _, _>(
                    "sku",
                    StorageType::Text,
                    |w: &Widget| SqlValue::from(w.sku.clone()),
                    |w: &mut Widget, v: SqlValue| w.sku = v.as_str().unwrap().to_string(),
                )
                .not_null()
                .indexed(Some("widgets_lookup"), 1, true)
                .unique(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn create_table_sql_matches_expected_shape() {
        let descriptor = widget_descriptor();
        let sql = create_table_sql(&descriptor);
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"widgets\"(\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"name\" TEXT NOT NULL, \"sku\" TEXT NOT NULL UNIQUE)"
        );
    }

    #[test]
    fn index_sql_defaults_name_and_sorts_columns() {
        let descriptor = widget_descriptor();
        let statements = create_index_sql(&descriptor).unwrap();
        assert!(statements
            .iter()
            .any(|s| s == "CREATE INDEX IF NOT EXISTS \"widgets_name\" ON \"widgets\"(\"name\")"));
        assert!(statements.iter().any(|s| s
            == "CREATE UNIQUE INDEX IF NOT EXISTS \"widgets_lookup\" ON \"widgets\"(\"sku\")"));
    }

    #[test]
    fn conflicting_uniqueness_on_shared_index_is_schema_error() {
        struct Pair {
            a: i64,
            b: i64,
        }
        let descriptor = TableDescriptorBuilder::new("pairs")
            .column(
                ColumnSpec::new::<Pair, _, _>(
                    "a",
                    StorageType::Integer,
                    |p: &Pair| SqlValue::from(p.a),
                    |p: &mut Pair, v: SqlValue| p.a = v.as_i64().unwrap(),
                )
                .indexed(Some("pairs_idx"), 0, true),
            )
            .column(
                ColumnSpec::new::<Pair, _, _>(
                    "b",
                    StorageType::Integer,
                    |p: &Pair| SqlValue::from(p.b),
                    |p: &mut Pair, v: SqlValue| p.b = v.as_i64().unwrap(),
                )
                .indexed(Some("pairs_idx"), 1, false),
            )
            .build()
            .unwrap();

        assert!(create_index_sql(&descriptor).is_err());
    }
}
