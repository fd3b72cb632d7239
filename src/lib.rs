//! `sqlite_orm` - Object-relational mapping layer over embedded SQLite
//!
//! Maps plain Rust structs onto SQLite tables through explicit, hand-built
//! descriptors rather than reflection: a [`descriptor::TableDescriptor`]
//! carries the column list and the closures that read and write a
//! record's fields, and the runtime never needs to know the concrete
//! record type to migrate a table, bind a statement, or decode a row.
//!
//! # Architecture
//!
//! - [`descriptor`] - `TableDescriptor`/`ColumnDescriptor` and the
//!   `Record` marker trait
//! - [`value`] - the heterogeneous `SqlValue` bound into and decoded out
//!   of parameter slots
//! - [`config`] - connection-open configuration: flags, encryption key,
//!   user-version/upgrade contract
//! - [`orm`] - the runtime itself: schema mapper, migrator, prepared
//!   statements, the connection, the CRUD pipeline, nested-savepoint
//!   transactions, and the change notifier
//! - [`error`] - the error taxonomy every fallible operation returns
//! - [`logging`] - tracing setup for embedding applications

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod logging;
pub mod orm;
pub mod value;

pub use descriptor::{ColumnDescriptor, IndexSpec, Record, RelationSpec, StorageType, TableDescriptor};
pub use error::{OrmError, Result};
pub use orm::Connection;
pub use value::SqlValue;
