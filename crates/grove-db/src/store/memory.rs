//! In-memory store backend.

use std::sync::{Arc, Mutex, RwLock};

use tracing::trace;

use super::{lock_poisoned, DatomStore};
use crate::error::DbResult;
use crate::snapshot::{Index, Snapshot};
use crate::tx::{Transaction, TxReport};

/// Ephemeral store holding the whole graph in memory.
///
/// Writers are serialized by `writer`; the published index is swapped under a
/// short write lock so readers only ever wait for a pointer swap.
#[derive(Debug, Default)]
pub struct MemoryStore {
    current: RwLock<Arc<Index>>,
    writer: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DatomStore for MemoryStore {
    fn snapshot(&self) -> DbResult<Snapshot> {
        let index = self.current.read().map_err(lock_poisoned)?;
        Ok(Snapshot::from_index(Arc::clone(&index)))
    }

    fn transact(&self, tx: &Transaction) -> DbResult<TxReport> {
        let _guard = self.writer.lock().map_err(lock_poisoned)?;
        let base = self.snapshot()?;
        let mut next = Index::clone(base.index());
        let report = next.apply(tx)?;
        trace!(
            ops = tx.len(),
            datoms = report.datoms.len(),
            basis = report.basis_after,
            "memory store commit"
        );
        *self.current.write().map_err(lock_poisoned)? = Arc::new(next);
        Ok(report)
    }

    fn flush(&self) -> DbResult<()> {
        Ok(())
    }

    fn evict(&self) -> DbResult<()> {
        // Nothing durable to rebuild from.
        Ok(())
    }

    fn is_materialized(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attr, Value};
    use crate::tx::{EntityRef, TxOp};
    use uuid::Uuid;

    #[test]
    fn test_snapshot_is_isolated_from_later_commits() {
        let store = MemoryStore::new();
        let before = store.snapshot().unwrap();

        let id = Uuid::new_v4();
        store
            .transact(&Transaction::from(vec![TxOp::ensure(Attr::BlockUuid, id)]))
            .unwrap();

        assert!(before.lookup(Attr::BlockUuid, &Value::Uuid(id)).is_none());
        assert!(store
            .snapshot()
            .unwrap()
            .lookup(Attr::BlockUuid, &Value::Uuid(id))
            .is_some());
    }

    #[test]
    fn test_failed_transaction_leaves_store_untouched() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let result = store.transact(&Transaction::from(vec![
            TxOp::ensure(Attr::BlockUuid, id),
            TxOp::assert(
                EntityRef::block(id),
                Attr::BlockParent,
                EntityRef::block(Uuid::new_v4()),
            ),
        ]));
        assert!(result.is_err());
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.basis(), 0);
        assert_eq!(snap.entity_count(), 0);
    }
}
