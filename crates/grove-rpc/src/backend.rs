//! Backends: something that can run a [`Call`].
//!
//! [`LocalBackend`] runs calls against an in-process engine on blocking
//! workers. [`RemoteBackend`] forwards them over a [`Connection`]. Both are
//! interchangeable behind [`Backend`].

use std::sync::Arc;

use async_trait::async_trait;
use grove_core::{
    export_pages, load_graph, GroveEngine, GroveResult, LoadOptions, Parser,
};
use tracing::debug;

use crate::client::Connection;
use crate::error::RpcResult;
use crate::wire::{Call, Reply, PROTOCOL_VERSION};

/// An instance of the storage contract that accepts calls.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn call(&self, call: Call) -> RpcResult<Reply>;
}

/// Run one call synchronously against an engine.
///
/// Shared by the local backend and the sidecar server.
pub fn execute_call(engine: &GroveEngine, parser: &dyn Parser, call: Call) -> GroveResult<Reply> {
    debug!("Executing {}", call.kind());
    let reply = match call {
        Call::Ping => Reply::Pong {
            version: PROTOCOL_VERSION.to_string(),
        },
        Call::Evict => {
            engine.evict()?;
            Reply::Evicted
        }
        Call::Query(query) => Reply::Query(engine.query(&query)?),
        Call::GetPageTree { page_id } => Reply::PageTree(engine.get_page_tree(page_id)?),
        Call::GetPagesForFileSync { page_ids } => {
            Reply::PageTrees(engine.get_pages_for_file_sync(&page_ids)?)
        }
        Call::ApplyOps { ops, options } => Reply::Applied(engine.apply_ops(&ops, &options)?),
        Call::LoadGraph { files } => {
            let opts = LoadOptions::from_config(&engine.config().ingest);
            Reply::Loaded(load_graph(engine, parser, &files, &opts)?)
        }
        Call::ExportPages { page_ids, options } => {
            let trees = engine.get_pages_for_file_sync(&page_ids)?;
            Reply::Exported(export_pages(&trees, &options))
        }
    };
    Ok(reply)
}

// ============================================================================
// LocalBackend
// ============================================================================

/// In-process backend.
#[derive(Clone)]
pub struct LocalBackend {
    engine: Arc<GroveEngine>,
    parser: Arc<dyn Parser>,
}

impl LocalBackend {
    pub fn new(engine: Arc<GroveEngine>, parser: Arc<dyn Parser>) -> Self {
        Self { engine, parser }
    }

    pub fn engine(&self) -> &Arc<GroveEngine> {
        &self.engine
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn call(&self, call: Call) -> RpcResult<Reply> {
        let engine = Arc::clone(&self.engine);
        let parser = Arc::clone(&self.parser);
        let reply =
            tokio::task::spawn_blocking(move || execute_call(&engine, parser.as_ref(), call))
                .await??;
        Ok(reply)
    }
}

// ============================================================================
// RemoteBackend
// ============================================================================

/// Backend reached over a protocol connection.
#[derive(Debug)]
pub struct RemoteBackend {
    connection: Connection,
}

impl RemoteBackend {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn call(&self, call: Call) -> RpcResult<Reply> {
        self.connection.send(call).await
    }
}
