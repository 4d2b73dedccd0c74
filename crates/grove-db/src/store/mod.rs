//! Store contract and backends.
//!
//! ## Architecture
//!
//! ```text
//! grove-core (outliner engine, ingestion)
//!     ↓
//! grove-db::DatomStore trait
//!     ↓
//! MemoryStore (tests, ephemeral graphs) or LogStore (durable JSONL log)
//! ```
//!
//! ## Contract
//!
//! - `transact` is all-or-nothing: a failed transaction leaves the store
//!   untouched and its basis unchanged.
//! - `snapshot` returns an immutable value; it never observes a transaction
//!   that commits after it was taken, and never waits for one in flight.
//! - Materialization may be lazy. `evict` releases the materialized view;
//!   the next access rebuilds it from durable state.

pub mod log;
pub mod memory;

pub use log::LogStore;
pub use memory::MemoryStore;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};
use crate::snapshot::Snapshot;
use crate::tx::{Transaction, TxReport};

// ============================================================================
// StoreConfig
// ============================================================================

/// Which backend to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    /// Ephemeral in-memory store.
    #[default]
    Memory,
    /// Durable append-only transaction log.
    File,
}

/// Configuration for opening a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// Backend to use.
    #[serde(default)]
    pub backend: StoreBackendKind,

    /// Directory holding the store files (required for `file`).
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Whether to fsync the log after every commit.
    #[serde(default)]
    pub sync_on_commit: bool,
}

impl StoreConfig {
    /// An in-memory store configuration.
    pub fn memory() -> Self {
        Self::default()
    }

    /// A durable store rooted at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: StoreBackendKind::File,
            path: Some(path.into()),
            sync_on_commit: false,
        }
    }

    /// Enable fsync after every commit.
    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }
}

// ============================================================================
// DatomStore Trait
// ============================================================================

/// Trait for graph store implementations.
///
/// ## Sync Design
///
/// This trait is synchronous and object safe. Callers that need async
/// behavior run store calls on blocking worker threads.
pub trait DatomStore: Send + Sync {
    /// Take an immutable point-in-time view.
    fn snapshot(&self) -> DbResult<Snapshot>;

    /// Apply a transaction atomically.
    fn transact(&self, tx: &Transaction) -> DbResult<TxReport>;

    /// Flush pending writes to durable storage.
    fn flush(&self) -> DbResult<()>;

    /// Drop the materialized view; it is rebuilt on next access.
    fn evict(&self) -> DbResult<()>;

    /// Whether the materialized view is currently resident.
    fn is_materialized(&self) -> bool;
}

/// Open a store with the given configuration.
///
/// # Errors
///
/// Returns an error if a file store has no path or its log cannot be opened.
pub fn open_store(config: &StoreConfig) -> DbResult<Arc<dyn DatomStore>> {
    match config.backend {
        StoreBackendKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackendKind::File => {
            let path = config.path.as_ref().ok_or_else(|| DbError::Config {
                message: "file store requires a path".to_string(),
            })?;
            let store = LogStore::open(path)?.with_sync_on_commit(config.sync_on_commit);
            Ok(Arc::new(store))
        }
    }
}

pub(crate) fn lock_poisoned<E: std::fmt::Display>(err: E) -> DbError {
    DbError::internal(format!("store lock poisoned: {}", err))
}

// ============================================================================
// Tests
// ============================================================================
