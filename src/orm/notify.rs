//! Change Notifier: a synchronous fan-out of table-level change events,
//! dispatched once a CRUD operation reports `affected_rows > 0`. Grounded
//! on the listener-collection shape of
//! `MutationContext` in the teacher's storage layer, which accumulates
//! side effects during a mutation and flushes them once the mutation
//! has actually taken effect; here the list is a set of subscribers
//! rather than a one-shot event buffer, since subscribers outlive any
//! single call.

use std::sync::{Arc, Mutex};

/// The kind of write that produced a [`ChangeEvent`]: insert, update,
/// delete and upsert each fire their own action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
    Upsert,
}

/// One committed change to a table.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub table: String,
    pub action: ChangeAction,
    pub affected_rows: i64,
}

/// Receives [`ChangeEvent`]s as they are dispatched. Implementations must
/// not block for long — dispatch happens synchronously on the thread that
/// performed the write.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}

/// The subscriber list a [`crate::orm::connection::Connection`] dispatches
/// through after every insert/update/delete/upsert.
#[derive(Default)]
pub struct ChangeNotifier {
    listeners: Mutex<Vec<Arc<dyn ChangeListener>>>,
}

impl ChangeNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(listener);
    }

    /// Dispatch `event` to every subscriber, but only when the write
    /// actually touched a row — a no-op update or delete fires nothing.
    pub fn notify(&self, table: &str, action: ChangeAction, affected_rows: i64) {
        if affected_rows <= 0 {
            return;
        }
        let event = ChangeEvent {
            table: table.to_string(),
            action,
            affected_rows,
        };
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_change(&event);
        }
    }
}
