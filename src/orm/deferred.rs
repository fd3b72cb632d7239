//! The lazily-stepping row sequence `deferred_query` returns. Each
//! iteration step advances the underlying statement; the statement is
//! released when the sequence is dropped. The connection must remain open
//! for the sequence's lifetime.
//!
//! A live `rusqlite::Rows<'stmt>` borrows the `Statement<'stmt>` it was
//! created from, so a struct that owns both the statement and its rows is
//! self-referential. `self_cell` is the crate this workspace already
//! reaches for elsewhere in the pack to express exactly that shape: an
//! owned value plus a borrow derived from it, packaged so the borrow can
//! outlive the function that created it. The `MutBorrow` wrapper gives the
//! dependent-construction closure `&mut` access to the owner without
//! `unsafe` on our part.

use crate::error::{ExtendedCode, OrmError, Result};
use crate::orm::statement::RowView;
use rusqlite::ToSql;
use self_cell::{self_cell, MutBorrow};

type RowsOutcome<'a> = std::result::Result<rusqlite::Rows<'a>, String>;

self_cell!(
    struct RowsCell<'conn> {
        owner: MutBorrow<rusqlite::Statement<'conn>>,

        #[covariant]
        dependent: RowsOutcome,
    }
);

/// A lazy, forward-only sequence of decoded rows. Dropping it drops the
/// underlying `rusqlite::Statement`, resetting and disposing the compiled
/// handle.
pub struct DeferredRows<'conn, T> {
    cell: RowsCell<'conn>,
    map_row: Box<dyn for<'row> FnMut(&RowView<'row>) -> Result<T> + 'conn>,
}

impl<'conn, T> DeferredRows<'conn, T> {
    pub(crate) fn new(
        stmt: rusqlite::Statement<'conn>,
        params: Vec<crate::value::SqlValue>,
        map_row: impl for<'row> FnMut(&RowView<'row>) -> Result<T> + 'conn,
    ) -> Self {
        let cell = RowsCell::new(MutBorrow::new(stmt), |stmt_cell| {
            let refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
            stmt_cell
                .borrow_mut()
                .query(refs.as_slice())
                .map_err(|e| e.to_string())
        });
        Self {
            cell,
            map_row: Box::new(map_row),
        }
    }
}

impl<T> Iterator for DeferredRows<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let map_row = &mut self.map_row;
        self.cell.with_dependent_mut(|_owner, outcome| match outcome {
            Ok(rows) => match rows.next() {
                Ok(Some(row)) => {
                    let view = RowView::from_row(row);
                    Some(map_row(&view))
                }
                Ok(None) => None,
                Err(e) => Some(Err(OrmError::from(e))),
            },
            Err(message) => Some(Err(OrmError::Engine {
                code: ExtendedCode::Other(-1),
                message: message.clone(),
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenOptions;
    use crate::orm::connection::Connection;

    fn open_conn() -> Connection {
        let conn = Connection::open(":memory:", &OpenOptions::default()).unwrap();
        conn.execute_non_query("CREATE TABLE t (v INTEGER)", &[]).unwrap();
        for v in 1..=3i64 {
            conn.execute_non_query("INSERT INTO t VALUES (?1)", &[v.into()]).unwrap();
        }
        conn
    }

    #[test]
    fn deferred_query_steps_through_every_row_lazily() {
        let conn = open_conn();
        let rows = conn
            .deferred_query("SELECT v FROM t ORDER BY v", Vec::new(), |row| row.get(0)?.as_i64())
            .unwrap();

        let values: Vec<i64> = rows.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn deferred_query_respects_bound_parameters() {
        let conn = open_conn();
        let rows = conn
            .deferred_query(
                "SELECT v FROM t WHERE v > ?1 ORDER BY v",
                vec![1i64.into()],
                |row| row.get(0)?.as_i64(),
            )
            .unwrap();

        let values: Vec<i64> = rows.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(values, vec![2, 3]);
    }

    #[test]
    fn deferred_query_on_empty_result_yields_nothing() {
        let conn = open_conn();
        let mut rows = conn
            .deferred_query("SELECT v FROM t WHERE v > 100", Vec::new(), |row| row.get(0)?.as_i64())
            .unwrap();

        assert!(rows.next().is_none());
    }
}
