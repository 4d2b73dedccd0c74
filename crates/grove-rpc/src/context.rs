//! Explicit backend context.
//!
//! Holds the local backend, the optional remote backend and the remote
//! readiness flag. Every call site receives the context instead of reaching
//! for global state.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use grove_core::RpcConfig;
use tracing::{debug, info, warn};

use crate::backend::{Backend, RemoteBackend};
use crate::client::{Connection, ConnectionOptions};
use crate::error::RpcResult;
use crate::routing::{self, Availability, Route};
use crate::wire::{Call, Reply};

/// Backends available to a client, and the rules for choosing between them.
pub struct BackendContext {
    local: Option<Arc<dyn Backend>>,
    remote: RwLock<Option<Arc<RemoteBackend>>>,
    remote_ready: AtomicBool,
    options: ConnectionOptions,
}

impl std::fmt::Debug for BackendContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendContext")
            .field("local", &self.local.as_ref().map(|b| b.name()))
            .field("remote_attached", &self.remote().is_some())
            .field("remote_ready", &self.remote_ready.load(Ordering::Acquire))
            .finish()
    }
}

impl BackendContext {
    pub fn new(local: Option<Arc<dyn Backend>>, config: &RpcConfig) -> Self {
        Self {
            local,
            remote: RwLock::new(None),
            remote_ready: AtomicBool::new(false),
            options: ConnectionOptions::from(config),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Connect to a remote backend over TCP and attach it.
    ///
    /// The remote is not used for routing until [`Self::set_remote`] marks it
    /// ready.
    pub async fn connect(&self, addr: SocketAddr) -> RpcResult<()> {
        let connection = Connection::connect(addr, self.options.clone()).await?;
        self.attach_remote(connection);
        info!("Attached remote backend at {}", addr);
        Ok(())
    }

    /// Attach an already established connection, replacing any previous one.
    pub fn attach_remote(&self, connection: Connection) {
        let previous = self.swap_remote(Some(Arc::new(RemoteBackend::new(connection))));
        if let Some(old) = previous {
            old.connection().close();
        }
        self.remote_ready.store(false, Ordering::Release);
    }

    /// Detach the remote backend. Its pending requests are rejected.
    pub fn disconnect(&self) {
        self.remote_ready.store(false, Ordering::Release);
        if let Some(old) = self.swap_remote(None) {
            old.connection().close();
            info!("Detached remote backend");
        }
    }

    /// Mark the remote backend as usable for routing, or not.
    pub fn set_remote(&self, ready: bool) {
        debug!("Remote backend ready: {}", ready);
        self.remote_ready.store(ready, Ordering::Release);
    }

    /// Whether routing may currently choose the remote backend.
    pub fn remote_available(&self) -> bool {
        self.remote_ready.load(Ordering::Acquire)
            && self
                .remote()
                .is_some_and(|remote| !remote.connection().is_closed())
    }

    pub fn availability(&self) -> Availability {
        Availability {
            local: self.local.is_some(),
            remote: self.remote_available(),
        }
    }

    // -------------------------------------------------------------------------
    // Calls
    // -------------------------------------------------------------------------

    /// Route and run a call.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RpcError::NoBackendAvailable`] immediately when no
    /// permitted backend is available, otherwise whatever the backend returns.
    pub async fn call(&self, call: Call) -> RpcResult<Reply> {
        let op = call.kind();
        let backend = self.pick(routing::route(op, self.availability())?)?;
        debug!("Routing {} to {}", op, backend.name());
        backend.call(call).await
    }

    /// Send a call to the remote backend without waiting for it.
    ///
    /// Failures are logged and never reach the caller. Does nothing when no
    /// remote is attached. Must be called inside a tokio runtime.
    pub fn post_best_effort(&self, call: Call) {
        let Some(remote) = self.remote() else {
            debug!("No remote attached, dropping best-effort {}", call.kind());
            return;
        };
        let op = call.kind();
        tokio::spawn(async move {
            if let Err(e) = remote.call(call).await {
                warn!("Best-effort {} failed: {}", op, e);
            }
        });
    }

    fn pick(&self, route: Route) -> RpcResult<Arc<dyn Backend>> {
        let backend: Option<Arc<dyn Backend>> = match route {
            Route::Local => self.local.clone(),
            Route::Remote => self.remote().map(|r| r as Arc<dyn Backend>),
        };
        // Availability was checked by `route`; a concurrent disconnect lands here.
        backend.ok_or(crate::RpcError::ConnectionClosed)
    }

    fn remote(&self) -> Option<Arc<RemoteBackend>> {
        self.remote
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn swap_remote(&self, next: Option<Arc<RemoteBackend>>) -> Option<Arc<RemoteBackend>> {
        let mut slot = self
            .remote
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *slot, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::server::Server;
    use crate::RpcError;
    use grove_core::{GroveEngine, Op, OutlineParser, Query, QueryResult};
    use std::time::Duration;
    use uuid::Uuid;

    fn local_backend(engine: &Arc<GroveEngine>) -> Arc<dyn Backend> {
        Arc::new(LocalBackend::new(Arc::clone(engine), Arc::new(OutlineParser)))
    }

    fn remote_connection(server: &Arc<Server>) -> Connection {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let (far_r, far_w) = tokio::io::split(far);
        tokio::spawn(Arc::clone(server).serve_connection(far_r, far_w));
        let (r, w) = tokio::io::split(near);
        Connection::new(
            r,
            w,
            ConnectionOptions {
                request_timeout: Duration::from_secs(10),
                handshake: true,
            },
        )
    }

    async fn page_count(ctx: &BackendContext) -> usize {
        match ctx.call(Call::Query(Query::AllPages)).await.unwrap() {
            Reply::Query(QueryResult::Pages(pages)) => pages.len(),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_backend_fails_immediately() {
        let ctx = BackendContext::new(None, &RpcConfig::default());
        let err = ctx.call(Call::Query(Query::AllPages)).await.unwrap_err();
        assert!(matches!(err, RpcError::NoBackendAvailable { op: "query" }));
        let err = ctx.call(Call::Ping).await.unwrap_err();
        assert!(matches!(err, RpcError::NoBackendAvailable { .. }));
    }

    #[tokio::test]
    async fn test_remote_only_used_after_set_remote() {
        let local_engine = Arc::new(GroveEngine::in_memory());
        let remote_engine = Arc::new(GroveEngine::in_memory());
        remote_engine.create_page("Only remote", None).unwrap();
        let server = Server::new(Arc::clone(&remote_engine), Arc::new(OutlineParser));

        let ctx = BackendContext::new(Some(local_backend(&local_engine)), &RpcConfig::default());
        ctx.attach_remote(remote_connection(&server));

        // Attached but not marked ready: queries stay local.
        assert!(!ctx.remote_available());
        assert_eq!(page_count(&ctx).await, 0);

        ctx.set_remote(true);
        assert!(ctx.remote_available());
        assert_eq!(page_count(&ctx).await, 1);

        ctx.disconnect();
        assert!(!ctx.remote_available());
        assert_eq!(page_count(&ctx).await, 0);
        assert!(matches!(
            ctx.call(Call::Ping).await,
            Err(RpcError::NoBackendAvailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_writes_are_visible_to_later_reads() {
        let local_engine = Arc::new(GroveEngine::in_memory());
        let remote_engine = Arc::new(GroveEngine::in_memory());
        let server = Server::new(Arc::clone(&remote_engine), Arc::new(OutlineParser));
        let ctx = BackendContext::new(Some(local_backend(&local_engine)), &RpcConfig::default());
        ctx.attach_remote(remote_connection(&server));
        ctx.set_remote(true);

        let page = Uuid::new_v4();
        ctx.call(Call::ApplyOps {
            ops: vec![Op::CreatePage {
                title: "Shared".into(),
                uuid: Some(page),
            }],
            options: Default::default(),
        })
        .await
        .unwrap();

        match ctx.call(Call::GetPageTree { page_id: page }).await.unwrap() {
            Reply::PageTree(Some(tree)) => assert_eq!(tree.page.id, page),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(page_count(&ctx).await, 1);
        assert!(remote_engine.get_page_tree(page).unwrap().is_some());
        assert!(local_engine.get_page_tree(page).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_best_effort_reaches_remote() {
        let remote_engine = Arc::new(GroveEngine::in_memory());
        let server = Server::new(Arc::clone(&remote_engine), Arc::new(OutlineParser));
        let ctx = BackendContext::new(None, &RpcConfig::default());

        // Without a remote it is a silent no-op.
        ctx.post_best_effort(Call::Ping);

        ctx.attach_remote(remote_connection(&server));
        let page = Uuid::new_v4();
        ctx.post_best_effort(Call::ApplyOps {
            ops: vec![Op::CreatePage {
                title: "Side".into(),
                uuid: Some(page),
            }],
            options: Default::default(),
        });

        let mut found = false;
        for _ in 0..200 {
            if remote_engine.get_page_tree(page).unwrap().is_some() {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(found);
    }
}
