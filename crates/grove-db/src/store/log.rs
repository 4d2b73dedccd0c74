//! Durable store backend backed by an append-only JSONL transaction log.
//!
//! Each committed transaction is written as one line holding its resolved
//! datoms. The in-memory index is a materialized view of the log: it is built
//! lazily on first access, and [`DatomStore::evict`] drops it so memory can be
//! reclaimed for cold graphs.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{lock_poisoned, DatomStore};
use crate::error::{DbError, DbResult};
use crate::snapshot::{Index, Snapshot};
use crate::tx::{Datom, Transaction, TxReport};

/// Filename for the transaction log.
pub const LOG_FILENAME: &str = "tx-log.jsonl";

/// One committed transaction as persisted in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogEntry {
    basis: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    datoms: Vec<Datom>,
}

/// Append-only, lazily materialized store.
#[derive(Debug)]
pub struct LogStore {
    /// Path to the store directory.
    path: PathBuf,

    /// Whether to fsync after each commit.
    sync_on_commit: bool,

    /// Materialized view; `None` until first access or after eviction.
    view: RwLock<Option<Arc<Index>>>,

    /// Serializes writers and materialization.
    writer: Mutex<()>,
}

impl LogStore {
    /// Open or create a log store in `path`.
    ///
    /// The log is not read until the first snapshot or transaction.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening LogStore at {:?}", path);
        fs::create_dir_all(&path)
            .map_err(|e| DbError::log_io(&path, format!("failed to create store dir: {}", e)))?;
        Ok(Self {
            path,
            sync_on_commit: false,
            view: RwLock::new(None),
            writer: Mutex::new(()),
        })
    }

    /// Enable fsync after every commit.
    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Path to the log file.
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILENAME)
    }

    fn current(&self) -> DbResult<Option<Arc<Index>>> {
        Ok(self.view.read().map_err(lock_poisoned)?.clone())
    }

    /// Return the materialized view, replaying the log if needed.
    ///
    /// Must be called with the writer lock held.
    fn materialize_locked(&self) -> DbResult<Arc<Index>> {
        if let Some(index) = self.current()? {
            return Ok(index);
        }
        let index = Arc::new(self.replay()?);
        *self.view.write().map_err(lock_poisoned)? = Some(Arc::clone(&index));
        Ok(index)
    }

    fn replay(&self) -> DbResult<Index> {
        let log_path = self.log_path();
        let mut index = Index::default();
        if !log_path.exists() {
            return Ok(index);
        }

        debug!("Replaying transaction log {:?}", log_path);
        let file = File::open(&log_path)
            .map_err(|e| DbError::log_io(&log_path, format!("failed to open log: {}", e)))?;
        let reader = BufReader::new(file);
        let mut entries = 0usize;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: LogEntry = serde_json::from_str(&line).map_err(|e| DbError::LogParse {
                path: log_path.clone(),
                line: line_num + 1,
                message: e.to_string(),
            })?;
            index.replay(&entry.datoms, entry.basis);
            entries += 1;
        }

        debug!("Replayed {} transactions (basis {})", entries, index.basis());
        Ok(index)
    }

    fn append(&self, entry: &LogEntry) -> DbResult<()> {
        let log_path = self.log_path();
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| DbError::log_io(&log_path, format!("failed to open log: {}", e)))?;
        file.write_all(line.as_bytes())
            .map_err(|e| DbError::log_io(&log_path, format!("failed to append: {}", e)))?;
        if self.sync_on_commit {
            file.sync_data()
                .map_err(|e| DbError::log_io(&log_path, format!("failed to sync: {}", e)))?;
        }
        Ok(())
    }
}

impl DatomStore for LogStore {
    fn snapshot(&self) -> DbResult<Snapshot> {
        if let Some(index) = self.current()? {
            return Ok(Snapshot::from_index(index));
        }
        let _guard = self.writer.lock().map_err(lock_poisoned)?;
        Ok(Snapshot::from_index(self.materialize_locked()?))
    }

    fn transact(&self, tx: &Transaction) -> DbResult<TxReport> {
        let _guard = self.writer.lock().map_err(lock_poisoned)?;
        let base = self.materialize_locked()?;
        let mut next = Index::clone(&base);
        let report = next.apply(tx)?;

        // The view is only published once the entry is durable.
        self.append(&LogEntry {
            basis: report.basis_after,
            label: tx.label.clone(),
            datoms: report.datoms.clone(),
        })?;
        *self.view.write().map_err(lock_poisoned)? = Some(Arc::new(next));
        Ok(report)
    }

    fn flush(&self) -> DbResult<()> {
        let log_path = self.log_path();
        if !log_path.exists() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .append(true)
            .open(&log_path)
            .map_err(|e| DbError::log_io(&log_path, format!("failed to open log: {}", e)))?;
        file.sync_all()
            .map_err(|e| DbError::log_io(&log_path, format!("failed to sync: {}", e)))
    }

    fn evict(&self) -> DbResult<()> {
        let _guard = self.writer.lock().map_err(lock_poisoned)?;
        let mut view = self.view.write().map_err(lock_poisoned)?;
        if view.take().is_some() {
            debug!("Evicted materialized view for {:?}", self.path);
        }
        Ok(())
    }

    fn is_materialized(&self) -> bool {
        match self.view.read() {
            Ok(view) => view.is_some(),
            Err(e) => {
                warn!("LogStore view lock poisoned: {}", e);
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attr, Value};
    use crate::tx::{EntityRef, TxOp};
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn test_log_store_persists_and_replays() {
        let dir = TempDir::new().expect("create temp dir");
        let id = Uuid::new_v4();

        {
            let store = LogStore::open(dir.path()).unwrap();
            store
                .transact(&Transaction::from(vec![
                    TxOp::ensure(Attr::BlockUuid, id),
                    TxOp::assert(EntityRef::block(id), Attr::BlockContent, "persisted"),
                ]))
                .unwrap();
        }

        let store = LogStore::open(dir.path()).unwrap();
        assert!(!store.is_materialized());
        let snap = store.snapshot().unwrap();
        assert!(store.is_materialized());
        assert_eq!(snap.basis(), 1);
        let e = snap.lookup(Attr::BlockUuid, &Value::Uuid(id)).unwrap();
        assert_eq!(snap.get(e, Attr::BlockContent), Some(&Value::from("persisted")));
    }

    #[test]
    fn test_evict_then_rematerialize() {
        let dir = TempDir::new().expect("create temp dir");
        let store = LogStore::open(dir.path()).unwrap();
        let id = Uuid::new_v4();
        store
            .transact(&Transaction::from(vec![TxOp::ensure(Attr::BlockUuid, id)]))
            .unwrap();

        store.evict().unwrap();
        assert!(!store.is_materialized());

        // New entity ids keep increasing after a replay.
        let other = Uuid::new_v4();
        let report = store
            .transact(&Transaction::from(vec![TxOp::ensure(Attr::BlockUuid, other)]))
            .unwrap();
        let snap = store.snapshot().unwrap();
        let first = snap.lookup(Attr::BlockUuid, &Value::Uuid(id)).unwrap();
        assert!(report.created[0] > first);
        assert_eq!(snap.basis(), 2);
    }

    #[test]
    fn test_failed_transaction_is_not_logged() {
        let dir = TempDir::new().expect("create temp dir");
        let store = LogStore::open(dir.path()).unwrap();
        let result = store.transact(&Transaction::from(vec![TxOp::assert(
            EntityRef::block(Uuid::new_v4()),
            Attr::BlockContent,
            "orphan",
        )]));
        assert!(result.is_err());
        assert!(!store.log_path().exists());
    }
}
