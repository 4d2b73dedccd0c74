//! Grove engine – the store handle every operation runs against.
//!
//! [`GroveEngine`] owns a [`DatomStore`] and serializes every write through a
//! single writer lock, so a graph has exactly one logical writer at any
//! instant. Reads take snapshots and never wait for writers.

use std::sync::{Arc, Mutex, MutexGuard};

use grove_db::{open_store, DatomStore, MemoryStore, Snapshot, Transaction, TxReport};
use uuid::Uuid;

use crate::config::GroveConfig;
use crate::db_adapter::IntoGroveResult;
use crate::errors::{GroveError, GroveResult};
use crate::model::{Block, BlockPatch, NewBlock, Page, PageLiteral, PageTree};
use crate::outliner::{
    self, read, ApplyOptions, ApplyOutcome, Draft, ImportOptions, IndentOptions, Op, OpFailure,
    OpOutcome, OpResult,
};
use crate::query::{Query, QueryResult};

// ============================================================================
// GroveEngine
// ============================================================================

/// The main engine for grove operations.
///
/// # Construction
///
/// Use [`GroveEngine::open`] with a loaded [`GroveConfig`] for typical usage,
/// or [`GroveEngine::in_memory`] for tests and ephemeral graphs.
///
/// # Example
///
/// ```ignore
/// use grove_core::{GroveConfig, GroveEngine, NewBlock};
///
/// let engine = GroveEngine::open(GroveConfig::load_default()?)?;
/// let page = engine.create_page("Inbox", None)?;
/// ```
pub struct GroveEngine {
    config: GroveConfig,
    store: Arc<dyn DatomStore>,
    /// Held for the duration of every commit; the total order of writes.
    tx_queue: Mutex<()>,
}

impl std::fmt::Debug for GroveEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroveEngine")
            .field("config", &self.config)
            .field("materialized", &self.store.is_materialized())
            .finish()
    }
}

impl GroveEngine {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Open the store described by `config.store`.
    ///
    /// # Errors
    ///
    /// Returns [`GroveError::InvalidConfiguration`] if the configuration fails
    /// validation, or a storage error if the store cannot be opened.
    pub fn open(config: GroveConfig) -> GroveResult<Self> {
        config.validate()?;
        let store = open_store(&config.store).into_grove_result()?;
        tracing::debug!("Opened {:?} store", config.store.backend);
        Ok(Self::with_store(store, config))
    }

    /// An engine over a fresh in-memory store with default configuration.
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), GroveConfig::default())
    }

    /// An engine over an existing store.
    pub fn with_store(store: Arc<dyn DatomStore>, config: GroveConfig) -> Self {
        Self {
            config,
            store,
            tx_queue: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &GroveConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DatomStore> {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Store access
    // -------------------------------------------------------------------------

    /// Take a point-in-time snapshot.
    pub fn snapshot(&self) -> GroveResult<Snapshot> {
        self.store.snapshot().into_grove_result()
    }

    fn lock_queue(&self) -> GroveResult<MutexGuard<'_, ()>> {
        self.tx_queue.lock().map_err(|_| GroveError::Storage {
            message: "transaction queue lock poisoned".to_string(),
            unique_violation: false,
        })
    }

    /// Commit a transaction through the serialized queue.
    pub fn transact(&self, tx: &Transaction) -> GroveResult<TxReport> {
        let _guard = self.lock_queue()?;
        self.store.transact(tx).into_grove_result()
    }

    /// Build a transaction from the current snapshot and commit it while
    /// holding the writer lock, so no other write lands in between.
    ///
    /// An empty transaction is not committed and yields `None`.
    pub fn transact_with<F>(&self, build: F) -> GroveResult<Option<TxReport>>
    where
        F: FnOnce(&Snapshot) -> GroveResult<Transaction>,
    {
        let _guard = self.lock_queue()?;
        let snap = self.snapshot()?;
        let tx = build(&snap)?;
        if tx.is_empty() {
            return Ok(None);
        }
        self.store.transact(&tx).into_grove_result().map(Some)
    }

    pub fn flush(&self) -> GroveResult<()> {
        self.store.flush().into_grove_result()
    }

    /// Release the materialized view; it is rebuilt on next access.
    pub fn evict(&self) -> GroveResult<()> {
        self.store.evict().into_grove_result()
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Run one op and commit it.
    ///
    /// The op is all-or-nothing: on error the store is untouched.
    pub fn run(&self, op: &Op) -> GroveResult<OpOutcome> {
        let _guard = self.lock_queue()?;
        self.run_locked(op, None)
    }

    fn run_locked(&self, op: &Op, label: Option<&str>) -> GroveResult<OpOutcome> {
        let before = self.snapshot()?;

        if let Op::Transact { tx } = op {
            let report = self.store.transact(tx).into_grove_result()?;
            let after = self.snapshot()?;
            let affected_pages = outliner::pages_touched_by(&before, &after, &report);
            return Ok(OpOutcome {
                result: OpResult::Transacted {
                    basis: report.basis_after,
                    datoms: report.datoms.len(),
                },
                affected_pages,
            });
        }

        let mut draft = Draft::new(&before, label.unwrap_or(op.name()));
        let result = outliner::execute(&mut draft, op)?;
        let (tx, affected_pages) = draft.finish();
        if !tx.is_empty() {
            let report = self.store.transact(&tx).into_grove_result()?;
            tracing::debug!(
                "{}: {} ops, {} datoms, basis {}",
                op.name(),
                tx.len(),
                report.datoms.len(),
                report.basis_after
            );
        }
        Ok(OpOutcome {
            result,
            affected_pages,
        })
    }

    /// Run a batch of ops in order under one hold of the writer lock.
    ///
    /// Each op sees the effects of the ones before it. The first failing op
    /// stops the batch; ops already committed stay committed and the outcome
    /// records where and why it stopped.
    ///
    /// # Errors
    ///
    /// Only lock failures are returned as errors. Op failures are reported in
    /// [`ApplyOutcome::failure`].
    pub fn apply_ops(&self, ops: &[Op], opts: &ApplyOptions) -> GroveResult<ApplyOutcome> {
        let _guard = self.lock_queue()?;
        let mut outcome = ApplyOutcome::default();
        for (index, op) in ops.iter().enumerate() {
            match self.run_locked(op, opts.label.as_deref()) {
                Ok(done) => {
                    outcome.applied += 1;
                    outcome.affected_pages.extend(done.affected_pages);
                    if !done.result.is_noop() {
                        outcome.result = Some(done.result);
                    }
                }
                Err(err) => {
                    tracing::debug!("apply-ops stopped at op {} ({}): {}", index, op.name(), err);
                    outcome.failure = Some(OpFailure {
                        index,
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                    break;
                }
            }
        }
        Ok(outcome)
    }

    pub fn save_block(&self, id: Uuid, patch: BlockPatch) -> GroveResult<OpOutcome> {
        self.run(&Op::SaveBlock { id, patch })
    }

    pub fn insert_blocks(
        &self,
        blocks: Vec<NewBlock>,
        anchor: Uuid,
        sibling: bool,
    ) -> GroveResult<OpOutcome> {
        self.run(&Op::InsertBlocks {
            blocks,
            anchor,
            sibling,
        })
    }

    pub fn delete_blocks(&self, ids: Vec<Uuid>, children: bool) -> GroveResult<OpOutcome> {
        self.run(&Op::DeleteBlocks { ids, children })
    }

    pub fn move_blocks(&self, ids: Vec<Uuid>, target: Uuid, sibling: bool) -> GroveResult<OpOutcome> {
        self.run(&Op::MoveBlocks {
            ids,
            target,
            sibling,
        })
    }

    pub fn move_blocks_up_down(&self, ids: Vec<Uuid>, up: bool) -> GroveResult<OpOutcome> {
        self.run(&Op::MoveBlocksUpDown { ids, up })
    }

    pub fn indent_outdent_blocks(
        &self,
        ids: Vec<Uuid>,
        indent: bool,
        options: IndentOptions,
    ) -> GroveResult<OpOutcome> {
        self.run(&Op::IndentOutdentBlocks {
            ids,
            indent,
            options,
        })
    }

    pub fn create_page(&self, title: &str, uuid: Option<Uuid>) -> GroveResult<OpOutcome> {
        self.run(&Op::CreatePage {
            title: title.to_string(),
            uuid,
        })
    }

    pub fn rename_page(&self, id: Uuid, title: &str) -> GroveResult<OpOutcome> {
        self.run(&Op::RenamePage {
            id,
            title: title.to_string(),
        })
    }

    pub fn delete_page(&self, id: Uuid) -> GroveResult<OpOutcome> {
        self.run(&Op::DeletePage { id })
    }

    pub fn batch_import(
        &self,
        pages: Vec<PageLiteral>,
        options: ImportOptions,
    ) -> GroveResult<OpOutcome> {
        self.run(&Op::BatchImport { pages, options })
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Nested block tree of a page, or `None` if the id is not a page.
    pub fn get_page_tree(&self, page_id: Uuid) -> GroveResult<Option<PageTree>> {
        outliner::get_page_tree(&self.snapshot()?, page_id)
    }

    /// Page trees for file writers; unknown ids are skipped.
    pub fn get_pages_for_file_sync(&self, page_ids: &[Uuid]) -> GroveResult<Vec<PageTree>> {
        outliner::get_pages_for_file_sync(&self.snapshot()?, page_ids)
    }

    pub fn block(&self, id: Uuid) -> GroveResult<Option<Block>> {
        let snap = self.snapshot()?;
        Ok(read::entity_of(&snap, id).and_then(|e| read::read_block(&snap, e)))
    }

    pub fn page_by_title(&self, title: &str) -> GroveResult<Option<Page>> {
        let snap = self.snapshot()?;
        Ok(read::page_by_title(&snap, title).and_then(|e| read::read_page(&snap, e)))
    }

    /// Execute a query against a fresh snapshot.
    pub fn query(&self, query: &Query) -> GroveResult<QueryResult> {
        crate::query::execute(&self.snapshot()?, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_db::StoreConfig;
    use tempfile::TempDir;

    #[test]
    fn test_open_rejects_invalid_config() {
        let mut config = GroveConfig::default();
        config.ingest.batch_size = 0;
        let err = GroveEngine::open(config).unwrap_err();
        assert!(matches!(err, GroveError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_file_store_survives_reopen_and_evict() {
        let dir = TempDir::new().unwrap();
        let config = GroveConfig {
            store: StoreConfig::file(dir.path()),
            ..GroveConfig::default()
        };

        let page = {
            let engine = GroveEngine::open(config.clone()).unwrap();
            let page = match engine.create_page("Durable", None).unwrap().result {
                OpResult::PageCreated { id, .. } => id,
                other => panic!("unexpected result {other:?}"),
            };
            engine
                .insert_blocks(vec![NewBlock::new("kept")], page, false)
                .unwrap();
            engine.flush().unwrap();
            page
        };

        let engine = GroveEngine::open(config).unwrap();
        let tree = engine.get_page_tree(page).unwrap().unwrap();
        assert_eq!(tree.children[0].content, "kept");

        engine.evict().unwrap();
        assert!(!engine.store().is_materialized());
        assert!(engine.get_page_tree(page).unwrap().is_some());
        assert!(engine.store().is_materialized());
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let engine = GroveEngine::in_memory();
        let before = engine.snapshot().unwrap();
        engine.create_page("Later", None).unwrap();
        assert!(read::page_by_title(&before, "later").is_none());
        assert!(engine.page_by_title("later").unwrap().is_some());
    }
}
