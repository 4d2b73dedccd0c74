//! # grove-core
//!
//! **Grove** – outliner knowledge graph engine.
//!
//! This crate provides the block tree rules, batch ingestion and the file
//! writer for a grove graph. Facts live in a [`grove_db`] store; this crate
//! decides which fact sets are valid.
//!
//! ## Main Types
//!
//! - [`GroveEngine`] – store handle and entry point for all operations
//! - [`Op`] – closed set of outliner operations, applied with
//!   [`GroveEngine::apply_ops`]
//! - [`GroveError`] – domain-specific error type
//!
//! ## Modules
//!
//! - [`outliner`] – structural block and page operations
//! - [`conflicts`] – identity and name conflict detection
//! - [`batch`] – ordered batch transactions and chunked commits
//! - [`ingest`] – parallel parse, validate and load pipeline
//! - [`parser`] – parser contract and the outline parser
//! - [`export`] – page tree rendering
//! - [`query`] – read-only queries
//!
//! ## Example
//!
//! ```ignore
//! use grove_core::{GroveEngine, NewBlock, OpResult};
//!
//! let engine = GroveEngine::in_memory();
//! let OpResult::PageCreated { id, .. } = engine.create_page("Inbox", None)?.result else {
//!     unreachable!()
//! };
//! engine.insert_blocks(vec![NewBlock::new("first thought")], id, false)?;
//! let tree = engine.get_page_tree(id)?;
//! ```

// Modules
pub mod batch;
pub mod canonical;
pub mod config;
pub mod conflicts;
pub mod db_adapter;
pub mod engine;
pub mod errors;
pub mod export;
pub mod ingest;
pub mod model;
pub mod order_key;
pub mod outliner;
pub mod parser;
pub mod query;

// Re-exports for convenience
pub use batch::{
    build_batch_tx, commit_batches, create_batches, retract_file_blocks, ChunkFailure,
    CommitSummary,
};
pub use canonical::{canonicalize, CanonicalName};
pub use config::{
    GroveConfig, IngestConfig, RpcConfig, CONFIG_ENV_VAR, DEFAULT_BATCH_SIZE,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RPC_PORT, GROVE_HOME_DIR,
};
pub use conflicts::{
    detect_identity_conflicts, detect_name_conflicts, validate_batch, ConflictIdentity,
    ConflictKind, ConflictRecord, ConflictReport, ConflictSource,
};
pub use engine::GroveEngine;
pub use errors::{ErrorKind, GroveError, GroveResult};
pub use export::{export_pages, render_page, sanitize_file_name, write_pages, ExportOptions, ExportedFile};
pub use ingest::{
    collect_sources, execute_load_plan, load_graph, parse_files, plan_load, FileParseOutcome,
    LoadOptions, LoadPlan, LoadReport, SourceFile, Status,
};
pub use model::{
    Block, BlockKind, BlockPatch, NewBlock, Page, PageLiteral, PageTree, Properties, TreeNode,
};
pub use order_key::{key_between, keys_between, OrderKeyError};
pub use outliner::{
    get_page_tree, get_pages_for_file_sync, ApplyOptions, ApplyOutcome, ImportOptions,
    IndentOptions, Op, OpFailure, OpOutcome, OpResult,
};
pub use parser::{OutlineParser, ParseError, ParseOptions, ParsedBlock, ParsedFile, ParsedPage, Parser};
pub use query::{Query, QueryResult};
