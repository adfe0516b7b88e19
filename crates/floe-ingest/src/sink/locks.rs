//! Per-table write exclusion.
//!
//! Two writers for the same table within one process conflict immediately
//! instead of queueing: the second gets `ConcurrentWriteConflict`.

use std::sync::Arc;

use dashmap::DashSet;

/// Registry of tables currently being written. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct TableLocks {
    held: Arc<DashSet<String>>,
}

impl TableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `table`, or `None` if another writer holds it.
    pub fn try_acquire(&self, table: &str) -> Option<TableLock> {
        self.held.insert(table.to_string()).then(|| TableLock {
            table: table.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_locked(&self, table: &str) -> bool {
        self.held.contains(table)
    }
}

/// Held write lock. Released on drop.
#[derive(Debug)]
pub struct TableLock {
    table: String,
    held: Arc<DashSet<String>>,
}

impl TableLock {
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl Drop for TableLock {
    fn drop(&mut self) {
        self.held.remove(&self.table);
    }
}
