//! # grove-db
//!
//! Storage layer for grove: an associative store of immutable facts
//! ("datoms") with atomic multi-fact transactions, identity lookups and
//! lazily materialized snapshots.
//!
//! This crate knows nothing about outlines, pages or files beyond the schema
//! attributes it stores. The rules for producing valid fact sets live in
//! `grove-core`.
//!
//! ## Architecture
//!
//! ```text
//! grove-cli → grove-core → grove-db::DatomStore
//!                             ↑
//!                  MemoryStore | LogStore
//! ```
//!
//! ## Modules
//!
//! - `schema`: attributes, values and entity ids
//! - `tx`: transaction operations and reports
//! - `snapshot`: immutable views and the index behind them
//! - `layered`: the copy-on-write map the index is built from
//! - `store`: the store trait and its backends
//!
//! ## Usage
//!
//! ```ignore
//! use grove_db::{open_store, Attr, EntityRef, StoreConfig, Transaction, TxOp};
//!
//! let store = open_store(&StoreConfig::file("/path/to/graph"))?;
//! store.transact(&Transaction::from(vec![
//!     TxOp::ensure(Attr::BlockUuid, id),
//!     TxOp::assert(EntityRef::block(id), Attr::BlockContent, "hello"),
//! ]))?;
//! let snapshot = store.snapshot()?;
//! ```

pub mod error;
mod layered;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod tx;

pub use error::{DbError, DbResult};
pub use schema::{Attr, EntityId, Value, ValueType};
pub use snapshot::Snapshot;
pub use store::{open_store, DatomStore, LogStore, MemoryStore, StoreBackendKind, StoreConfig};
pub use tx::{Datom, EntityRef, Transaction, TxOp, TxReport, TxValue};
