#![allow(dead_code)]

use sqlite_orm::config::OpenOptions;
use sqlite_orm::Connection;
use std::sync::Once;
use tempfile::NamedTempFile;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        sqlite_orm::logging::init_test_logging();
    });
}

pub fn memory_conn() -> Connection {
    init_test_logging();
    Connection::open(":memory:", &OpenOptions::default()).expect("open in-memory connection")
}

pub fn file_conn() -> (NamedTempFile, Connection) {
    init_test_logging();
    let file = NamedTempFile::new().expect("create temp db file");
    let conn = Connection::open(file.path(), &OpenOptions::default()).expect("open file connection");
    (file, conn)
}
