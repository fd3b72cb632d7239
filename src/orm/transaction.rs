//! Transaction Controller: a depth-counted stack of nested `SAVEPOINT`s,
//! each named so the depth is recoverable from the name alone. The
//! depth-keyed savepoint naming scheme is the same idea the pack's
//! `musqlite` transaction module expresses for ANSI nested transactions
//! (`SAVEPOINT _sqlx_savepoint_{depth}` / `RELEASE SAVEPOINT
//! _sqlx_savepoint_{depth-1}`); this controller names its savepoints
//! `S<random>D<depth>` instead, so two sibling call sites opening a
//! savepoint at the same depth never collide.
//!
//! The teacher's `SqliteStorage::mutate` wraps a whole operation in one
//! `Transaction`; this controller generalizes that to arbitrarily nested
//! savepoints so an operation can itself call another transactional
//! operation without losing atomicity.

use crate::error::{OrmError, Result};
use crate::orm::connection::Connection;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::instrument;

/// A handle to one open savepoint. Must be released or rolled back exactly
/// once; dropping it without doing either leaves the savepoint open on the
/// connection, matching `PreparedStatement`'s non-`Drop`-managed disposal
/// elsewhere in this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavepointToken {
    name: String,
    depth: i64,
}

impl SavepointToken {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn depth(&self) -> i64 {
        self.depth
    }
}

/// Depth-counted nested-savepoint stack for one connection.
#[derive(Default)]
pub struct TransactionController {
    depth: AtomicI64,
    stack: Mutex<Vec<SavepointToken>>,
}

impl TransactionController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn depth(&self) -> i64 {
        self.depth.load(Ordering::SeqCst)
    }

    fn token_for(depth: i64) -> SavepointToken {
        let random: u32 = rand::random();
        SavepointToken {
            name: format!("S{random}D{depth}"),
            depth,
        }
    }

    /// Open a new nested savepoint one level deeper than the current depth
    /// (`begin_transaction`/`save_transaction_point` are the same operation
    /// here, since every level of this controller is a savepoint, including
    /// the outermost).
    ///
    /// # Errors
    ///
    /// Propagates the underlying `SAVEPOINT` failure. A fatal-class engine
    /// error forces a full rollback of the entire stack before the error is
    /// returned.
    #[instrument(level = "debug", skip(self, conn), fields(depth))]
    pub fn save_transaction_point(&self, conn: &Connection) -> Result<SavepointToken> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::Span::current().record("depth", depth);
        let token = Self::token_for(depth);
        let sql = format!("SAVEPOINT \"{}\"", token.name);
        if let Err(err) = conn.execute_non_query(&sql, &[]) {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            self.force_rollback_on_fatal(conn, &err);
            return Err(err);
        }
        self.stack_mut().push(token.clone());
        tracing::debug!(savepoint = %token.name, "opened savepoint");
        Ok(token)
    }

    /// Alias for [`Self::save_transaction_point`] at the top level.
    pub fn begin_transaction(&self, conn: &Connection) -> Result<SavepointToken> {
        self.save_transaction_point(conn)
    }

    /// Release `token`, committing its savepoint into its parent. Releasing
    /// a savepoint also releases every savepoint nested inside it — the
    /// same cascade SQLite's own `RELEASE SAVEPOINT` performs.
    ///
    /// # Errors
    ///
    /// [`OrmError::InvalidState`] if `token` has already been released;
    /// otherwise the underlying `RELEASE` failure.
    #[instrument(level = "debug", skip(self, conn), fields(savepoint = %token.name))]
    pub fn release(&self, conn: &Connection, token: &SavepointToken) -> Result<()> {
        let position = self
            .stack_mut()
            .iter()
            .position(|t| t == token)
            .ok_or_else(|| OrmError::InvalidState(format!("savepoint {} is not open", token.name)))?;
        let sql = format!("RELEASE SAVEPOINT \"{}\"", token.name);
        conn.execute_non_query(&sql, &[])?;
        self.stack_mut().truncate(position);
        self.depth.store(position as i64, Ordering::SeqCst);
        Ok(())
    }

    /// [`Self::release`] under the name commonly used for the outermost
    /// commit.
    pub fn commit(&self, conn: &Connection, token: &SavepointToken) -> Result<()> {
        self.release(conn, token)
    }

    /// Roll back to `token` without releasing it, discarding any savepoint
    /// nested inside it.
    ///
    /// # Errors
    ///
    /// [`OrmError::InvalidState`] if `token` is not currently open;
    /// otherwise the underlying `ROLLBACK TO` failure.
    #[instrument(level = "debug", skip(self, conn), fields(savepoint = %token.name))]
    pub fn rollback_to(&self, conn: &Connection, token: &SavepointToken) -> Result<()> {
        let position = self
            .stack_mut()
            .iter()
            .position(|t| t == token)
            .ok_or_else(|| OrmError::InvalidState(format!("savepoint {} is not open", token.name)))?;
        let sql = format!("ROLLBACK TO SAVEPOINT \"{}\"", token.name);
        conn.execute_non_query(&sql, &[])?;
        let mut stack = self.stack_mut();
        stack.truncate(position + 1);
        self.depth.store(token.depth, Ordering::SeqCst);
        Ok(())
    }

    /// Unwind the entire stack, rolling back every open savepoint down to
    /// depth zero. A no-op if the stack is already empty — at depth zero
    /// there is no open transaction for `ROLLBACK` to act on, and issuing it
    /// anyway would just raise its own engine error.
    ///
    /// # Errors
    ///
    /// The underlying `ROLLBACK` failure.
    #[instrument(level = "debug", skip(self, conn))]
    pub fn rollback(&self, conn: &Connection) -> Result<()> {
        if self.depth.load(Ordering::SeqCst) == 0 {
            return Ok(());
        }
        conn.execute_non_query("ROLLBACK", &[])?;
        self.stack_mut().clear();
        self.depth.store(0, Ordering::SeqCst);
        tracing::debug!("rolled back entire transaction stack");
        Ok(())
    }

    /// Run `body` inside a new savepoint, releasing it on success. On
    /// failure this issues a full [`Self::rollback`] rather than rolling
    /// back just to `token`: nested scopes inherit the outer rollback, so a
    /// caller that catches an inner scope's error and continues observes
    /// the whole transaction torn down, not just the failing savepoint.
    /// Generalizes the teacher's `SqliteStorage::mutate` single-level
    /// transaction wrapper to any nesting depth.
    ///
    /// # Errors
    ///
    /// Propagates `body`'s error after rolling back; propagates a
    /// `SAVEPOINT`/`RELEASE`/`ROLLBACK` failure if one occurs instead.
    #[instrument(level = "debug", skip(self, conn, body))]
    pub fn run_in_transaction<T>(&self, conn: &Connection, body: impl FnOnce() -> Result<T>) -> Result<T> {
        let token = self.save_transaction_point(conn)?;
        match body() {
            Ok(value) => {
                self.release(conn, &token)?;
                Ok(value)
            }
            Err(err) => {
                self.rollback(conn)?;
                Err(err)
            }
        }
    }

    /// String-addressed variant of [`Self::rollback_to`]/[`Self::rollback`]
    /// for callers that only have a savepoint name rather than the typed
    /// token.
    ///
    /// # Errors
    ///
    /// [`OrmError::InvalidArgument`] if `name` is `Some` but not a
    /// well-formed `S<random>D<depth>` token, or names a savepoint that is
    /// not currently open; otherwise as [`Self::rollback_to`]/
    /// [`Self::rollback`].
    pub fn rollback_to_named(&self, conn: &Connection, name: Option<&str>) -> Result<()> {
        let Some(name) = name else {
            return self.rollback(conn);
        };
        let parsed = parse_token_name(name)?;
        let open = self
            .stack_mut()
            .iter()
            .find(|t| t.name == parsed.name)
            .cloned()
            .ok_or_else(|| OrmError::InvalidArgument(format!("no open savepoint named {name}")))?;
        self.rollback_to(conn, &open)
    }

    fn force_rollback_on_fatal(&self, conn: &Connection, err: &OrmError) {
        let fatal = matches!(err, OrmError::Engine { code, .. } if code.is_fatal());
        if fatal {
            let _ = conn.execute_non_query("ROLLBACK", &[]);
            self.stack_mut().clear();
            self.depth.store(0, Ordering::SeqCst);
        }
    }

    fn stack_mut(&self) -> std::sync::MutexGuard<'_, Vec<SavepointToken>> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Parse a `S<random>D<depth>` savepoint name back into its depth, for
/// callers validating a name they did not get from
/// [`TransactionController::save_transaction_point`] directly.
fn parse_token_name(name: &str) -> Result<SavepointToken> {
    let malformed = || OrmError::InvalidArgument(format!("malformed savepoint token: {name}"));
    let rest = name.strip_prefix('S').ok_or_else(malformed)?;
    let (random, depth) = rest.split_once('D').ok_or_else(malformed)?;
    if random.is_empty() || !random.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let depth: i64 = depth.parse().map_err(|_| malformed())?;
    Ok(SavepointToken {
        name: name.to_string(),
        depth,
    })
}
