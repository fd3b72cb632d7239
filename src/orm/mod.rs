//! The ORM runtime: schema mapping and migration, prepared-statement
//! lifecycle, and transaction-wrapped CRUD, layered over one
//! [`connection::Connection`].

pub mod connection;
pub mod deferred;
pub mod migrator;
pub mod notify;
pub mod pipeline;
pub mod schema;
pub mod statement;
pub mod transaction;

pub use connection::Connection;
pub use notify::{ChangeAction, ChangeEvent, ChangeListener, ChangeNotifier};
pub use schema::MigrationOutcome;
pub use transaction::{SavepointToken, TransactionController};
