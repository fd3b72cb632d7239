//! Migrator: reconciles an existing table with a descriptor by additive
//! `ALTER TABLE ADD COLUMN` only — no drops, no renames, no type changes.

use crate::descriptor::TableDescriptor;
use crate::error::Result;
use crate::orm::schema::{create_index_sql, create_table_sql, quote_ident, MigrationOutcome};
use rusqlite::Connection;
use std::collections::HashSet;

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let exists = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?1")?
        .exists([table])?;
    Ok(exists)
}

/// Case-insensitive existing column names, read via `PRAGMA table_info`.
fn existing_columns(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let sql = format!("PRAGMA table_info({})", quote_ident(table));
    let mut stmt = conn.prepare(&sql)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<String>, rusqlite::Error>>()?;
    Ok(names.into_iter().map(|n| n.to_lowercase()).collect())
}

/// Create or additively migrate `descriptor`'s table, then ensure its
/// indices exist. Returns [`MigrationOutcome::Created`] if the table did
/// not exist before this call, [`MigrationOutcome::Migrated`] otherwise —
/// even when the column diff was empty.
pub fn create_or_migrate(conn: &Connection, descriptor: &TableDescriptor) -> Result<MigrationOutcome> {
    let existed = table_exists(conn, &descriptor.table_name)?;

    conn.execute(&create_table_sql(descriptor), [])?;

    if existed {
        let existing = existing_columns(conn, &descriptor.table_name)?;
        for column in &descriptor.columns {
            if !existing.contains(&column.name.to_lowercase()) {
                let sql = format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    quote_ident(&descriptor.table_name),
                    column.sql_declaration()
                );
                conn.execute(&sql, [])?;
            }
        }
    }

    for index_sql in create_index_sql(descriptor)? {
        conn.execute(&index_sql, [])?;
    }

    Ok(if existed {
        MigrationOutcome::Migrated
    } else {
        MigrationOutcome::Created
    })
}
