//! Client side of a connection: pending-request table, timers and push
//! dispatch.
//!
//! A [`Connection`] owns two background tasks. The writer drains an outgoing
//! channel onto the transport. The reader decodes inbound lines, resolves
//! pending requests and hands pushes to the registered handlers.
//!
//! Every request either gets its response, times out, or is rejected with
//! [`RpcError::ConnectionClosed`] when the transport goes away. Nothing is
//! dropped silently.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec;
use crate::error::{RpcError, RpcResult};
use crate::wire::{Call, Message, Push, Reply, Request, PROTOCOL_VERSION};

/// Callback for push events. Panics are caught and logged.
pub type PushHandler = Arc<dyn Fn(&Push) + Send + Sync>;

/// Connection knobs.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub request_timeout: Duration,
    /// Send a handshake as the first message.
    pub handshake: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(grove_core::DEFAULT_REQUEST_TIMEOUT_MS),
            handshake: true,
        }
    }
}

impl From<&grove_core::RpcConfig> for ConnectionOptions {
    fn from(config: &grove_core::RpcConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            handshake: config.handshake,
        }
    }
}

// ============================================================================
// Pending table
// ============================================================================

struct Pending {
    op: &'static str,
    tx: oneshot::Sender<RpcResult<Reply>>,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct PendingTable {
    closed: bool,
    entries: HashMap<u64, Pending>,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<PendingTable>,
    handlers: Mutex<Vec<PushHandler>>,
    server_version: Mutex<Option<String>>,
    next_id: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // The tables hold no invariants a panicking holder could break.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn take(&self, id: u64) -> Option<Pending> {
        lock(&self.pending).entries.remove(&id)
    }

    fn resolve(&self, id: u64, result: RpcResult<Reply>) {
        match self.take(id) {
            Some(pending) => {
                pending.timer.abort();
                let _ = pending.tx.send(result);
            }
            None => debug!("Dropping response for unknown request {}", id),
        }
    }

    /// Reject everything in flight and refuse new requests.
    fn close(&self) {
        let drained: Vec<Pending> = {
            let mut table = lock(&self.pending);
            table.closed = true;
            table.entries.drain().map(|(_, p)| p).collect()
        };
        if !drained.is_empty() {
            debug!("Rejecting {} pending requests on close", drained.len());
        }
        for pending in drained {
            pending.timer.abort();
            let _ = pending.tx.send(Err(RpcError::ConnectionClosed));
        }
    }

    fn dispatch_push(&self, push: &Push) {
        let handlers: Vec<PushHandler> = lock(&self.handlers).clone();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(push))).is_err() {
                warn!("Push handler for '{}' panicked", push.event);
            }
        }
    }

    fn handle_inbound(&self, msg: Message) {
        match msg {
            Message::Response(resp) => {
                let id = resp.request_id;
                self.resolve(id, resp.into_result());
            }
            Message::Push(push) => self.dispatch_push(&push),
            Message::HandshakeResponse { version, accepted } => {
                if !accepted || version != PROTOCOL_VERSION {
                    warn!(
                        "Protocol version mismatch: client {}, server {}",
                        PROTOCOL_VERSION, version
                    );
                }
                *lock(&self.server_version) = Some(version);
            }
            Message::Handshake { .. } | Message::Request(_) => {
                warn!("Dropping unexpected client-bound message");
            }
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A live connection to a backend.
pub struct Connection {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    options: ConnectionOptions,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Connect over TCP.
    pub async fn connect(addr: SocketAddr, options: ConnectionOptions) -> RpcResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (r, w) = stream.into_split();
        debug!("Connected to {}", addr);
        Ok(Self::new(r, w, options))
    }

    /// Run a connection over an arbitrary transport.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, options: ConnectionOptions) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer_shared = Arc::clone(&shared);
        let writer = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(msg) = rx.recv().await {
                if let Err(e) = codec::write_message(&mut writer, &msg).await {
                    warn!("Write failed, closing connection: {}", e);
                    break;
                }
            }
            writer_shared.close();
        });

        let reader_shared = Arc::clone(&shared);
        let reader = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = String::new();
            loop {
                match codec::read_message(&mut reader, &mut buf).await {
                    Ok(Some(Ok(msg))) => reader_shared.handle_inbound(msg),
                    Ok(Some(Err(e))) => warn!("Dropping malformed message: {}", e),
                    Ok(None) => {
                        debug!("Transport closed by peer");
                        break;
                    }
                    Err(e) => {
                        debug!("Transport read failed: {}", e);
                        break;
                    }
                }
            }
            reader_shared.close();
        });

        if options.handshake {
            let _ = tx.send(Message::Handshake {
                version: PROTOCOL_VERSION.to_string(),
            });
        }

        Self {
            shared,
            outgoing: tx,
            reader,
            writer,
            options,
        }
    }

    /// Send a call and wait for its response with the default timeout.
    pub async fn send(&self, call: Call) -> RpcResult<Reply> {
        self.send_with_timeout(call, self.options.request_timeout).await
    }

    /// Send a call and wait for its response.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] when no response arrives in time.
    /// - [`RpcError::ConnectionClosed`] when the transport is or becomes closed.
    /// - [`RpcError::Remote`] when the backend answers with an error.
    pub async fn send_with_timeout(&self, call: Call, timeout: Duration) -> RpcResult<Reply> {
        let op = call.kind().as_str();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut table = lock(&self.shared.pending);
            if table.closed {
                return Err(RpcError::ConnectionClosed);
            }
            let timer_shared = Arc::clone(&self.shared);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(pending) = timer_shared.take(id) {
                    debug!("Request {} ({}) timed out", id, pending.op);
                    let _ = pending.tx.send(Err(RpcError::Timeout {
                        op: pending.op,
                        after: timeout,
                    }));
                }
            });
            table.entries.insert(id, Pending { op, tx, timer });
        }

        if self
            .outgoing
            .send(Message::Request(Request::new(id, call)))
            .is_err()
        {
            if let Some(pending) = self.shared.take(id) {
                pending.timer.abort();
            }
            return Err(RpcError::ConnectionClosed);
        }

        rx.await.unwrap_or(Err(RpcError::ConnectionClosed))
    }

    /// Register a push handler.
    pub fn on_push<F>(&self, handler: F)
    where
        F: Fn(&Push) + Send + Sync + 'static,
    {
        lock(&self.shared.handlers).push(Arc::new(handler));
    }

    /// Close the transport and reject every pending request.
    pub fn close(&self) {
        self.reader.abort();
        self.writer.abort();
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.pending).closed
    }

    /// Requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.pending).entries.len()
    }

    /// Version reported by the server's handshake response, if any.
    pub fn server_version(&self) -> Option<String> {
        lock(&self.shared.server_version).clone()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Response;
    use grove_core::{ErrorKind, Query, QueryResult};
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    fn options() -> ConnectionOptions {
        ConnectionOptions {
            request_timeout: Duration::from_secs(5),
            handshake: false,
        }
    }

    /// A connection plus the far end of its transport.
    fn pair() -> (
        Connection,
        BufReader<ReadHalf<DuplexStream>>,
        WriteHalf<DuplexStream>,
    ) {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let (r, w) = tokio::io::split(near);
        let (far_r, far_w) = tokio::io::split(far);
        (Connection::new(r, w, options()), BufReader::new(far_r), far_w)
    }

    async fn next_request(reader: &mut BufReader<ReadHalf<DuplexStream>>) -> Request {
        let mut buf = String::new();
        match codec::read_message(reader, &mut buf).await.unwrap() {
            Some(Ok(Message::Request(req))) => req,
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_response_resolves_request() {
        let (conn, mut far_r, mut far_w) = pair();
        let server = tokio::spawn(async move {
            let req = next_request(&mut far_r).await;
            assert_eq!(req.call, Call::Query(Query::AllPages));
            let resp = Response::ok(req.id, Reply::Query(QueryResult::Pages(vec![])));
            codec::write_message(&mut far_w, &Message::Response(resp))
                .await
                .unwrap();
            (far_r, far_w)
        });

        let reply = conn.send(Call::Query(Query::AllPages)).await.unwrap();
        assert_eq!(reply, Reply::Query(QueryResult::Pages(vec![])));
        assert_eq!(conn.pending_count(), 0);
        let _keep = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_error_is_typed() {
        let (conn, mut far_r, mut far_w) = pair();
        tokio::spawn(async move {
            let req = next_request(&mut far_r).await;
            let err = RpcError::Remote {
                kind: ErrorKind::NotFound,
                message: "page not found: x".into(),
            };
            codec::write_message(&mut far_w, &Message::Response(Response::err(req.id, &err)))
                .await
                .unwrap();
            std::future::pending::<()>().await;
        });

        let err = conn.send(Call::Ping).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_clears_pending() {
        let (conn, _far_r, _far_w) = pair();
        let err = conn
            .send_with_timeout(Call::Ping, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout { op: "ping", .. }));
        assert_eq!(conn.pending_count(), 0);
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_close_rejects_pending() {
        let (conn, mut far_r, far_w) = pair();
        let conn = Arc::new(conn);
        let sender = Arc::clone(&conn);
        let call = tokio::spawn(async move { sender.send(Call::Ping).await });

        // Wait until the request is on the wire, then drop the far end.
        let _ = next_request(&mut far_r).await;
        assert_eq!(conn.pending_count(), 1);
        drop(far_r);
        drop(far_w);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed));
        assert_eq!(conn.pending_count(), 0);
        assert!(conn.is_closed());
        assert!(matches!(
            conn.send(Call::Ping).await,
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_malformed_lines_and_panicking_handlers() {
        let (conn, mut far_r, mut far_w) = pair();
        let seen = Arc::new(AtomicUsize::new(0));
        conn.on_push(|_| panic!("handler bug"));
        let counter = Arc::clone(&seen);
        conn.on_push(move |push| {
            assert_eq!(push.event, "pages-changed");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::spawn(async move {
            let req = next_request(&mut far_r).await;
            far_w.write_all(b"garbage\n").await.unwrap();
            let push = Push::pages_changed(Default::default()).unwrap();
            codec::write_message(&mut far_w, &Message::Push(push))
                .await
                .unwrap();
            let resp = Response::ok(
                req.id,
                Reply::Pong {
                    version: PROTOCOL_VERSION.into(),
                },
            );
            codec::write_message(&mut far_w, &Message::Response(resp))
                .await
                .unwrap();
            std::future::pending::<()>().await;
        });

        let reply = conn.send(Call::Ping).await.unwrap();
        assert!(matches!(reply, Reply::Pong { .. }));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_handshake_records_server_version() {
        let (near, far) = tokio::io::duplex(4096);
        let (r, w) = tokio::io::split(near);
        let (far_r, mut far_w) = tokio::io::split(far);
        let mut far_r = BufReader::new(far_r);
        let conn = Connection::new(
            r,
            w,
            ConnectionOptions {
                handshake: true,
                ..options()
            },
        );

        let mut buf = String::new();
        let first = codec::read_message(&mut far_r, &mut buf).await.unwrap();
        assert!(matches!(first, Some(Ok(Message::Handshake { .. }))));
        codec::write_message(
            &mut far_w,
            &Message::HandshakeResponse {
                version: "0".into(),
                accepted: false,
            },
        )
        .await
        .unwrap();
        let ping = tokio::spawn(async move {
            let req = next_request(&mut far_r).await;
            let resp = Response::ok(req.id, Reply::Pong { version: "0".into() });
            codec::write_message(&mut far_w, &Message::Response(resp))
                .await
                .unwrap();
            std::future::pending::<()>().await;
        });

        // A mismatch is logged only; the connection keeps working.
        conn.send(Call::Ping).await.unwrap();
        assert_eq!(conn.server_version().as_deref(), Some("0"));
        ping.abort();
    }
}
