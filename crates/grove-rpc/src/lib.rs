//! # grove-rpc
//!
//! Protocol and routing layer for grove.
//!
//! A client talks to a backend through [`BackendContext`], which routes each
//! call to the in-process [`LocalBackend`] or to a sidecar reached over a
//! [`Connection`]. The sidecar side is [`Server`].
//!
//! ## Wire format
//!
//! Newline-delimited JSON, one [`Message`] per line:
//!
//! - `handshake` / `handshake-response` carry the protocol version
//! - `request` carries an id, a [`Call`] and a timestamp
//! - `response` echoes the request id with a [`Reply`] or an error
//! - `push` is an unsolicited event such as `pages-changed`

pub mod backend;
pub mod client;
pub mod codec;
pub mod context;
pub mod error;
pub mod routing;
pub mod server;
pub mod wire;

pub use backend::{execute_call, Backend, LocalBackend, RemoteBackend};
pub use client::{Connection, ConnectionOptions, PushHandler};
pub use context::BackendContext;
pub use error::{RpcError, RpcResult};
pub use routing::{classify, route, Availability, Route, RouteClass};
pub use server::Server;
pub use wire::{
    Call, Message, OpKind, PagesChanged, Push, Reply, Request, Response, WireError,
    PAGES_CHANGED, PROTOCOL_VERSION,
};
