//! Sidecar server: accepts connections and runs calls against one engine.
//!
//! Each connection gets a reader loop, a writer task fed by a channel, and a
//! forwarder for broadcast pushes. Requests run on blocking workers, so a
//! slow load never stalls the reader; writes still serialize through the
//! engine's writer lock.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use grove_core::{GroveEngine, Parser};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::backend::execute_call;
use crate::codec;
use crate::error::{RpcError, RpcResult};
use crate::wire::{Message, Push, Request, Response, PROTOCOL_VERSION};

const PUSH_CAPACITY: usize = 256;

/// A backend served over the wire protocol.
pub struct Server {
    engine: Arc<GroveEngine>,
    parser: Arc<dyn Parser>,
    pushes: broadcast::Sender<Push>,
}

impl Server {
    pub fn new(engine: Arc<GroveEngine>, parser: Arc<dyn Parser>) -> Arc<Self> {
        let (pushes, _) = broadcast::channel(PUSH_CAPACITY);
        Arc::new(Self {
            engine,
            parser,
            pushes,
        })
    }

    pub fn engine(&self) -> &Arc<GroveEngine> {
        &self.engine
    }

    /// Bind the loopback interface. Port 0 picks a free port.
    pub async fn bind(port: u16) -> RpcResult<TcpListener> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> RpcResult<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            stream.set_nodelay(true)?;
            debug!("Accepted connection from {}", peer);
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                let (r, w) = stream.into_split();
                if let Err(e) = server.serve_connection(r, w).await {
                    warn!("Connection from {} ended with error: {}", peer, e);
                }
                debug!("Connection from {} closed", peer);
            });
        }
    }

    /// Serve one connection until the peer closes it.
    pub async fn serve_connection<R, W>(self: Arc<Self>, reader: R, writer: W) -> RpcResult<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(msg) = rx.recv().await {
                codec::write_message(&mut writer, &msg).await?;
            }
            Ok::<_, RpcError>(())
        });

        let mut subscription = self.pushes.subscribe();
        let push_tx = tx.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                match subscription.recv().await {
                    Ok(push) => {
                        if push_tx.send(Message::Push(push)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Connection fell behind, {} pushes skipped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut reader = BufReader::new(reader);
        let mut buf = String::new();
        let result = loop {
            let msg = match codec::read_message(&mut reader, &mut buf).await {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(e))) => {
                    warn!("Dropping malformed message: {}", e);
                    continue;
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            match msg {
                Message::Handshake { version } => {
                    let accepted = version == PROTOCOL_VERSION;
                    if !accepted {
                        warn!(
                            "Protocol version mismatch: client {}, server {}",
                            version, PROTOCOL_VERSION
                        );
                    }
                    let _ = tx.send(Message::HandshakeResponse {
                        version: PROTOCOL_VERSION.to_string(),
                        accepted,
                    });
                }
                Message::Request(request) => {
                    tokio::spawn(Arc::clone(&self).handle_request(request, tx.clone()));
                }
                Message::HandshakeResponse { .. } | Message::Response(_) | Message::Push(_) => {
                    warn!("Dropping unexpected server-bound message");
                }
            }
        };

        forwarder.abort();
        drop(tx);
        // In-flight requests hold senders; the writer ends once they finish.
        match writer_task.await {
            Ok(Err(e)) => debug!("Writer stopped: {}", e),
            Err(e) => debug!("Writer task failed: {}", e),
            Ok(Ok(())) => {}
        }
        result
    }

    async fn handle_request(self: Arc<Self>, request: Request, tx: mpsc::UnboundedSender<Message>) {
        let id = request.id;
        let op = request.call.kind();
        let engine = Arc::clone(&self.engine);
        let parser = Arc::clone(&self.parser);
        let outcome = tokio::task::spawn_blocking(move || {
            execute_call(&engine, parser.as_ref(), request.call)
        })
        .await;

        let response = match outcome {
            Ok(Ok(reply)) => {
                let changed = reply.affected_pages().filter(|p| !p.is_empty()).cloned();
                let _ = tx.send(Message::Response(Response::ok(id, reply)));
                if let Some(pages) = changed {
                    self.broadcast_pages_changed(pages);
                }
                return;
            }
            Ok(Err(e)) => {
                debug!("Request {} ({}) failed: {}", id, op, e);
                Response::err(id, &RpcError::Core(e))
            }
            Err(e) => {
                warn!("Request {} ({}) panicked: {}", id, op, e);
                Response::err(id, &RpcError::from(e))
            }
        };
        let _ = tx.send(Message::Response(response));
    }

    fn broadcast_pages_changed(&self, pages: std::collections::BTreeSet<uuid::Uuid>) {
        match Push::pages_changed(pages) {
            // No subscribers is fine.
            Ok(push) => {
                let _ = self.pushes.send(push);
            }
            Err(e) => warn!("Could not encode pages-changed push: {}", e),
        }
    }
}
