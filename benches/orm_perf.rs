use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sqlite_orm::descriptor::builder::{ColumnSpec, TableDescriptorBuilder};
use sqlite_orm::{Connection, SqlValue, StorageType, TableDescriptor};

struct Note {
    id: i64,
    body: String,
}

fn note_descriptor() -> TableDescriptor {
    TableDescriptorBuilder::new("notes")
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

fn bench_insert(c: &mut Criterion) {
    let conn = Connection::open(":memory:", &sqlite_orm::config::OpenOptions::default()).unwrap();
    let descriptor = note_descriptor();
    conn.ensure_schema(&descriptor).unwrap();

    c.bench_function("insert_one_row", |b| {
        b.iter(|| {
            let mut note = Note {
                id: 0,
                body: "benchmark row".to_string(),
            };
            sqlite_orm::orm::pipeline::insert(black_box(&conn), black_box(&descriptor), &mut note).unwrap();
        });
    });
}

fn bench_deferred_query(c: &mut Criterion) {
    let conn = Connection::open(":memory:", &sqlite_orm::config::OpenOptions::default()).unwrap();
    let descriptor = note_descriptor();
    conn.ensure_schema(&descriptor).unwrap();
    for i in 0..1000 {
        let mut note = Note { id: 0, body: format!("row {i}") };
        sqlite_orm::orm::pipeline::insert(&conn, &descriptor, &mut note).unwrap();
    }

    c.bench_function("deferred_query_1000_rows", |b| {
        b.iter(|| {
            let rows = conn
                .deferred_query("SELECT id, body FROM notes", Vec::new(), |row| {
                    Ok((row.get(0)?.as_i64()?, row.get(1)?.as_str()?.to_string()))
                })
                .unwrap();
            let count = rows.filter_map(std::result::Result::ok).count();
            black_box(count);
        });
    });
}

criterion_group!(benches, bench_insert, bench_deferred_query);
criterion_main!(benches);
