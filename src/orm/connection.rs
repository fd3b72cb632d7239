//! The `Connection`: owns one `rusqlite::Connection`, applies the pragma
//! sequence an open call must follow, and exposes the
//! non-query/scalar/query/deferred-query surface every other module is
//! built on.

use crate::config::{OpenOptions, UserVersionConfig};
use crate::descriptor::TableDescriptor;
use crate::error::{OrmError, Result};
use crate::orm::deferred::DeferredRows;
use crate::orm::migrator::create_or_migrate;
use crate::orm::notify::{ChangeAction, ChangeListener, ChangeNotifier};
use crate::orm::schema::MigrationOutcome;
use crate::orm::statement::{PreparedStatement, RowView};
use crate::orm::transaction::{SavepointToken, TransactionController};
use crate::value::{DateTimeStorage, SqlValue};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::instrument;

/// An open database connection. `Send` but not `Sync`: like the
/// `rusqlite::Connection` it wraps, one connection serves one thread of
/// control at a time — concurrent access across connections is the
/// caller's responsibility.
pub struct Connection {
    inner: rusqlite::Connection,
    date_time_storage: DateTimeStorage,
    template_cache: Mutex<HashMap<(TypeId, String), String>>,
    migrated_tables: Mutex<HashSet<String>>,
    transactions: TransactionController,
    notifier: ChangeNotifier,
}

impl Connection {
    /// Open `path`, applying the pragma sequence in a fixed order: the
    /// encryption key first (so every later statement on this connection is
    /// already decrypting), then `busy_timeout`, then `foreign_keys = ON`,
    /// then `journal_mode = WAL` if the connection is writable.
    ///
    /// # Errors
    ///
    /// [`OrmError::CannotOpen`] if the file cannot be opened;
    /// [`OrmError::Engine`] if a pragma fails; [`OrmError::InvalidArgument`]
    /// if the encryption key is malformed.
    pub fn open(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        Self::open_with_upgrade::<fn(&rusqlite::Connection, i64) -> Result<()>>(path, options, None)
    }

    /// Open `path` and, once the pragma sequence has run, reconcile
    /// `PRAGMA user_version` against `version.target`: the library itself
    /// advances `PRAGMA user_version` to the configured target after the
    /// caller's upgrade function returns successfully.
    ///
    /// # Errors
    ///
    /// [`OrmError::UnsupportedDowngrade`] if the on-disk `user_version` is
    /// newer than `version.target`; otherwise as [`Connection::open`].
    pub fn open_with_version<F>(
        path: impl AsRef<Path>,
        options: &OpenOptions,
        version: UserVersionConfig<F>,
    ) -> Result<Self>
    where
        F: FnOnce(&rusqlite::Connection, i64) -> Result<()>,
    {
        Self::open_with_upgrade(path, options, Some(version))
    }

    #[instrument(level = "debug", skip(path, options, version), fields(path = %path.as_ref().display()))]
    fn open_with_upgrade<F>(
        path: impl AsRef<Path>,
        options: &OpenOptions,
        version: Option<UserVersionConfig<F>>,
    ) -> Result<Self>
    where
        F: FnOnce(&rusqlite::Connection, i64) -> Result<()>,
    {
        let path = path.as_ref();
        let inner = rusqlite::Connection::open_with_flags(path, options.flags.into()).map_err(|source| {
            OrmError::CannotOpen {
                path: path.display().to_string(),
                source,
            }
        })?;

        if let Some(key) = &options.encryption_key {
            inner.execute_batch(&key.pragma_sql()?)?;
        }

        inner.busy_timeout(std::time::Duration::from_millis(u64::from(options.busy_timeout_ms)))?;
        inner.execute_batch("PRAGMA foreign_keys = ON")?;
        if options.flags.is_writable() {
            inner.pragma_update(None, "journal_mode", "WAL")?;
        }

        if let Some(version) = version {
            let current: i64 = inner.query_row("PRAGMA user_version", [], |row| row.get(0))?;
            if current > version.target {
                return Err(OrmError::UnsupportedDowngrade {
                    found: current,
                    target: version.target,
                });
            }
            if current < version.target {
                (version.upgrade)(&inner, current)?;
                inner.pragma_update(None, "user_version", version.target)?;
            }
        }

        tracing::debug!("connection opened");
        Ok(Self {
            inner,
            date_time_storage: DateTimeStorage::default(),
            template_cache: Mutex::new(HashMap::new()),
            migrated_tables: Mutex::new(HashSet::new()),
            transactions: TransactionController::new(),
            notifier: ChangeNotifier::new(),
        })
    }

    #[must_use]
    pub const fn date_time_storage(&self) -> DateTimeStorage {
        self.date_time_storage
    }

    pub fn set_date_time_storage(&mut self, storage: DateTimeStorage) {
        self.date_time_storage = storage;
    }

    #[must_use]
    pub const fn raw(&self) -> &rusqlite::Connection {
        &self.inner
    }

    /// Ensure `descriptor`'s table and indices exist, running the
    /// create/migrate step at most once per table per connection — the
    /// derivation itself is memoized.
    #[instrument(level = "debug", skip(self, descriptor), fields(table = %descriptor.table_name))]
    pub fn ensure_schema(&self, descriptor: &TableDescriptor) -> Result<MigrationOutcome> {
        let mut migrated = self.migrated_tables.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if migrated.contains(&descriptor.table_name) {
            return Ok(MigrationOutcome::Migrated);
        }
        let outcome = create_or_migrate(&self.inner, descriptor)?;
        migrated.insert(descriptor.table_name.clone());
        tracing::debug!(?outcome, "schema ensured");
        Ok(outcome)
    }

    /// Compute-outside-lock, insert-if-absent SQL template cache, keyed by
    /// the caller's record type and a modifier string such as `"insert"` or
    /// `"update"`: templates are rendered once per `(type, operation)` pair
    /// and reused under concurrent access.
    pub fn cached_template(
        &self,
        record_type: TypeId,
        modifier: &str,
        render: impl FnOnce() -> String,
    ) -> String {
        let key = (record_type, modifier.to_string());
        if let Some(sql) = self
            .template_cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
        {
            return sql.clone();
        }
        let rendered = render();
        self.template_cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(key)
            .or_insert(rendered)
            .clone()
    }

    /// Compile `sql` against this connection via `rusqlite`'s own prepared
    /// statement cache: prepared handles are reused rather than recompiled
    /// on every call.
    pub fn prepare_cached(&self, sql: &str) -> Result<rusqlite::CachedStatement<'_>> {
        Ok(self.inner.prepare_cached(sql)?)
    }

    /// Step `sql` to completion, returning the affected-row count.
    pub fn execute_non_query(&self, sql: &str, params: &[SqlValue]) -> Result<i64> {
        let mut stmt = PreparedStatement::prepare(&self.inner, sql)?;
        stmt.execute_non_query(params)
    }

    /// Step `sql`, decoding column 0 of the first row.
    pub fn execute_scalar<T: crate::orm::statement::FromSqlValue + Default>(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<T> {
        let mut stmt = PreparedStatement::prepare(&self.inner, sql)?;
        stmt.execute_scalar(params)
    }

    /// Step `sql` to completion immediately, mapping every row (the eager
    /// variant of [`Self::deferred_query`]).
    pub fn query<T>(
        &self,
        sql: &str,
        params: &[SqlValue],
        map_row: impl FnMut(&RowView<'_>) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut stmt = PreparedStatement::prepare(&self.inner, sql)?;
        stmt.execute_query(params, map_row)
    }

    /// Compile `sql` and return a lazily-stepping sequence over its rows.
    /// The returned sequence borrows this connection and must be dropped
    /// (or fully consumed) before the connection closes.
    pub fn deferred_query<'conn, T>(
        &'conn self,
        sql: &str,
        params: Vec<SqlValue>,
        map_row: impl for<'row> FnMut(&RowView<'row>) -> Result<T> + 'conn,
    ) -> Result<DeferredRows<'conn, T>> {
        let stmt = self.inner.prepare(sql)?;
        Ok(DeferredRows::new(stmt, params, map_row))
    }

    /// Close the connection, flushing `rusqlite`'s prepared-statement
    /// cache first so compiled handles dispose deterministically rather
    /// than on connection drop.
    ///
    /// # Errors
    ///
    /// Propagates the close failure if SQLite refuses to close the
    /// connection, e.g. an unfinalized statement from outside this crate
    /// still references it.
    pub fn close(self) -> Result<()> {
        self.inner.flush_prepared_statement_cache();
        self.inner.close().map_err(|(_, err)| OrmError::from(err))
    }

    /// Current savepoint nesting depth.
    #[must_use]
    pub fn transaction_depth(&self) -> i64 {
        self.transactions.depth()
    }

    /// Open a new nested savepoint.
    pub fn begin_transaction(&self) -> Result<SavepointToken> {
        self.transactions.begin_transaction(self)
    }

    /// Open a new nested savepoint one level deeper than the current depth.
    pub fn save_transaction_point(&self) -> Result<SavepointToken> {
        self.transactions.save_transaction_point(self)
    }

    /// Release the innermost open savepoint.
    pub fn release_transaction_point(&self, token: &SavepointToken) -> Result<()> {
        self.transactions.release(self, token)
    }

    /// Roll back to `token`, discarding everything nested inside it.
    pub fn rollback_to(&self, token: &SavepointToken) -> Result<()> {
        self.transactions.rollback_to(self, token)
    }

    /// Unwind every open savepoint.
    pub fn rollback(&self) -> Result<()> {
        self.transactions.rollback(self)
    }

    /// String-addressed variant of [`Self::rollback_to`]/[`Self::rollback`]
    /// for callers holding a savepoint name rather than a [`SavepointToken`].
    pub fn rollback_to_named(&self, name: Option<&str>) -> Result<()> {
        self.transactions.rollback_to_named(self, name)
    }

    /// Run `body` inside a new savepoint, committing on success and rolling
    /// back the whole transaction on failure.
    pub fn run_in_transaction<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        self.transactions.run_in_transaction(self, body)
    }

    /// Subscribe to table-level change events.
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.notifier.subscribe(listener);
    }

    /// Dispatch a change event if the write actually touched a row. Called
    /// by the CRUD pipeline after every insert/update/delete/upsert.
    pub fn notify_change(&self, table: &str, action: ChangeAction, affected_rows: i64) {
        self.notifier.notify(table, action, affected_rows);
    }
}
