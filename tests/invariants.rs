mod common;

use common::memory_conn;
use proptest::prelude::*;
use sqlite_orm::descriptor::builder::{ColumnSpec, TableDescriptorBuilder};
use sqlite_orm::descriptor::StorageType;
use sqlite_orm::orm::pipeline;
use sqlite_orm::orm::MigrationOutcome;
use sqlite_orm::{SqlValue, TableDescriptor};

#[derive(Default, Clone, Debug, PartialEq)]
struct Note {
    id: i64,
    body: String,
}

fn note_descriptor() -> TableDescriptor {
    TableDescriptorBuilder::new("note")
        .column(
            ColumnSpec::new::<Note, _, _>(
                "id",
                StorageType::Integer,
                |n: &Note| SqlValue::from(n.id),
                |n: &mut Note, v: SqlValue| n.id = v.as_i64().unwrap(),
            )
            .primary_key()
            .auto_increment(),
        )
        .column(
            ColumnSpec::new::<Note, _, _>(
                "body",
                StorageType::Text,
                |n: &Note| SqlValue::from(n.body.clone()),
                |n: &mut Note, v: SqlValue| n.body = v.as_str().unwrap().to_string(),
            )
            .not_null(),
        )
        .build()
        .unwrap()
}

// Invariant 1: for any sequence of successful begin -> (save|release|rollback_to)* -> commit|rollback,
// transaction_depth returns to 0.
#[test]
fn invariant1_balanced_savepoints_return_depth_to_zero() {
    let conn = memory_conn();
    conn.execute_non_query("CREATE TABLE t (v INTEGER)", &[]).unwrap();

    let mut tokens = Vec::new();
    for _ in 0..5 {
        tokens.push(conn.save_transaction_point().unwrap());
    }
    while let Some(token) = tokens.pop() {
        conn.release_transaction_point(&token).unwrap();
    }
    assert_eq!(conn.transaction_depth(), 0);
}

#[test]
fn invariant1_rollback_unwinds_the_whole_stack() {
    let conn = memory_conn();
    conn.execute_non_query("CREATE TABLE t (v INTEGER)", &[]).unwrap();

    conn.begin_transaction().unwrap();
    conn.save_transaction_point().unwrap();
    conn.save_transaction_point().unwrap();

    conn.rollback().unwrap();
    assert_eq!(conn.transaction_depth(), 0);
}

proptest! {
    // Invariant 1, generalized: any depth of nested savepoints, each either
    // released in LIFO order or rolled back to and then released, ends at
    // depth 0.
    #[test]
    fn invariant1_nested_savepoints_always_return_to_zero(depth in 1usize..8, roll_back in any::<bool>()) {
        let conn = memory_conn();
        conn.execute_non_query("CREATE TABLE t (v INTEGER)", &[]).unwrap();

        let mut tokens = Vec::new();
        for i in 0..depth {
            let token = conn.save_transaction_point().unwrap();
            conn.execute_non_query("INSERT INTO t VALUES (?1)", &[SqlValue::from(i as i64)]).unwrap();
            tokens.push(token);
        }

        if roll_back {
            conn.rollback().unwrap();
        } else {
            while let Some(token) = tokens.pop() {
                conn.release_transaction_point(&token).unwrap();
            }
        }

        prop_assert_eq!(conn.transaction_depth(), 0);
    }
}

// Invariant 2: for any inserted record with auto-increment PK and prior zero
// sentinel, after insert the record's PK equals the engine's last_insert_rowid().
#[test]
fn invariant2_generated_pk_matches_last_insert_rowid() {
    let conn = memory_conn();
    let descriptor = note_descriptor();

    let mut note = Note { id: 0, body: "first".to_string() };
    pipeline::insert(&conn, &descriptor, &mut note).unwrap();
    assert_eq!(note.id, conn.raw().last_insert_rowid());

    let mut note2 = Note { id: 0, body: "second".to_string() };
    pipeline::insert(&conn, &descriptor, &mut note2).unwrap();
    assert_eq!(note2.id, conn.raw().last_insert_rowid());
    assert!(note2.id > note.id);
}

// Invariant 3: after migrate, every column name in D appears in the table;
// no existing column is removed or retyped.
#[test]
fn invariant3_migrate_preserves_and_adds_columns() {
    let conn = memory_conn();
    conn.execute_non_query("CREATE TABLE note (id INTEGER PRIMARY KEY AUTOINCREMENT)", &[])
        .unwrap();
    conn.execute_non_query("INSERT INTO note (id) VALUES (1)", &[]).unwrap();

    let descriptor = TableDescriptorBuilder::new("note")
        .column(
            ColumnSpec::new::<Note, _, _>(
                "id",
                StorageType::Integer,
                |n: &Note| SqlValue::from(n.id),
                |n: &mut Note, v: SqlValue| n.id = v.as_i64().unwrap(),
            )
            .primary_key()
            .auto_increment(),
        )
        .column(ColumnSpec::new::<Note, _, _>(
            "body",
            StorageType::Text,
            |n: &Note| SqlValue::from(n.body.clone()),
            |n: &mut Note, v: SqlValue| n.body = v.as_str().unwrap().to_string(),
        ))
        .build()
        .unwrap();

    conn.ensure_schema(&descriptor).unwrap();

    let columns: Vec<String> = conn
        .query("PRAGMA table_info(\"note\")", &[], |row| Ok(row.get(1)?.as_str()?.to_string()))
        .unwrap();
    assert!(columns.iter().any(|c| c.eq_ignore_ascii_case("id")));
    assert!(columns.iter().any(|c| c.eq_ignore_ascii_case("body")));

    let count: i64 = conn.execute_scalar("SELECT COUNT(*) FROM note", &[]).unwrap();
    assert_eq!(count, 1);
}

// Invariant 4: create_table is idempotent; the second invocation returns Migrated.
#[test]
fn invariant4_create_table_is_idempotent() {
    let conn = memory_conn();
    let descriptor = note_descriptor();

    assert_eq!(conn.ensure_schema(&descriptor).unwrap(), MigrationOutcome::Created);
    // `ensure_schema` memoizes per connection, so a second descriptor value
    // (same table name) still reports the post-creation outcome.
    assert_eq!(conn.ensure_schema(&note_descriptor()).unwrap(), MigrationOutcome::Migrated);
}

proptest! {
    // Invariant 5: insert(r); find::<T>(r.pk) returns a record equal to r on
    // all declared columns.
    #[test]
    fn invariant5_insert_then_find_round_trips(body in "[a-zA-Z0-9 ]{0,64}") {
        let conn = memory_conn();
        let descriptor = note_descriptor();

        let mut note = Note { id: 0, body: body.clone() };
        pipeline::insert(&conn, &descriptor, &mut note).unwrap();

        let found: Note = pipeline::find(&conn, &descriptor, SqlValue::from(note.id)).unwrap().unwrap();
        prop_assert_eq!(found, note);
    }
}
