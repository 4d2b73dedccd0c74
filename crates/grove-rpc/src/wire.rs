//! Wire messages exchanged between a client and a backend.
//!
//! Every message is one JSON object tagged by `type`. Requests carry a
//! client-chosen id that exactly one response echoes back; pushes are
//! unsolicited and uncorrelated.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use grove_core::{
    ApplyOptions, ApplyOutcome, ErrorKind, ExportOptions, ExportedFile, LoadReport, Op, PageTree,
    Query, QueryResult, SourceFile,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RpcError, RpcResult};

/// Protocol version exchanged in the handshake.
pub const PROTOCOL_VERSION: &str = "1";

/// Push event sent after a mutation changed pages.
pub const PAGES_CHANGED: &str = "pages-changed";

// ============================================================================
// Operations
// ============================================================================

/// Operation identifiers, the unit of routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpKind {
    Ping,
    Evict,
    Query,
    GetPageTree,
    GetPagesForFileSync,
    ApplyOps,
    LoadGraph,
    ExportPages,
}

impl OpKind {
    pub const ALL: [OpKind; 8] = [
        OpKind::Ping,
        OpKind::Evict,
        OpKind::Query,
        OpKind::GetPageTree,
        OpKind::GetPagesForFileSync,
        OpKind::ApplyOps,
        OpKind::LoadGraph,
        OpKind::ExportPages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Ping => "ping",
            OpKind::Evict => "evict",
            OpKind::Query => "query",
            OpKind::GetPageTree => "get-page-tree",
            OpKind::GetPagesForFileSync => "get-pages-for-file-sync",
            OpKind::ApplyOps => "apply-ops",
            OpKind::LoadGraph => "load-graph",
            OpKind::ExportPages => "export-pages",
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation with its typed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "kebab-case")]
pub enum Call {
    Ping,
    Evict,
    Query(Query),
    #[serde(rename_all = "camelCase")]
    GetPageTree { page_id: Uuid },
    #[serde(rename_all = "camelCase")]
    GetPagesForFileSync { page_ids: Vec<Uuid> },
    ApplyOps {
        ops: Vec<Op>,
        #[serde(default)]
        options: ApplyOptions,
    },
    LoadGraph { files: Vec<SourceFile> },
    #[serde(rename_all = "camelCase")]
    ExportPages {
        page_ids: Vec<Uuid>,
        #[serde(default)]
        options: ExportOptions,
    },
}

impl Call {
    pub fn kind(&self) -> OpKind {
        match self {
            Call::Ping => OpKind::Ping,
            Call::Evict => OpKind::Evict,
            Call::Query(_) => OpKind::Query,
            Call::GetPageTree { .. } => OpKind::GetPageTree,
            Call::GetPagesForFileSync { .. } => OpKind::GetPagesForFileSync,
            Call::ApplyOps { .. } => OpKind::ApplyOps,
            Call::LoadGraph { .. } => OpKind::LoadGraph,
            Call::ExportPages { .. } => OpKind::ExportPages,
        }
    }
}

/// Successful payload of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum Reply {
    Pong { version: String },
    Evicted,
    Query(QueryResult),
    PageTree(Option<PageTree>),
    PageTrees(Vec<PageTree>),
    Applied(ApplyOutcome),
    Loaded(LoadReport),
    Exported(Vec<ExportedFile>),
}

impl Reply {
    /// Pages a mutating reply reports as changed.
    pub fn affected_pages(&self) -> Option<&BTreeSet<Uuid>> {
        match self {
            Reply::Applied(outcome) => Some(&outcome.affected_pages),
            Reply::Loaded(report) => Some(&report.affected_pages),
            _ => None,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: u64,
    pub call: Call,
    pub timestamp: DateTime<Utc>,
}

impl Request {
    pub fn new(id: u64, call: Call) -> Self {
        Self {
            id,
            call,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireError {
    pub error_type: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub request_id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Reply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    pub fn ok(request_id: u64, reply: Reply) -> Self {
        Self {
            request_id,
            ok: true,
            payload: Some(reply),
            error: None,
        }
    }

    pub fn err(request_id: u64, err: &RpcError) -> Self {
        Self {
            request_id,
            ok: false,
            payload: None,
            error: Some(WireError {
                error_type: err.kind(),
                message: err.wire_message(),
            }),
        }
    }

    /// Convert into the caller-facing result.
    pub fn into_result(self) -> RpcResult<Reply> {
        match (self.ok, self.payload, self.error) {
            (true, Some(reply), _) => Ok(reply),
            (_, _, Some(err)) => Err(RpcError::Remote {
                kind: err.error_type,
                message: err.message,
            }),
            _ => Err(RpcError::Codec(format!(
                "response {} carries neither payload nor error",
                self.request_id
            ))),
        }
    }
}

/// Unsolicited server-to-client event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Push {
    pub event: String,
    pub payload: serde_json::Value,
}

/// Payload of a [`PAGES_CHANGED`] push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagesChanged {
    pub pages: BTreeSet<Uuid>,
}

impl Push {
    pub fn pages_changed(pages: BTreeSet<Uuid>) -> RpcResult<Self> {
        Ok(Self {
            event: PAGES_CHANGED.to_string(),
            payload: serde_json::to_value(PagesChanged { pages })?,
        })
    }
}

/// Every message on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    Handshake { version: String },
    HandshakeResponse { version: String, accepted: bool },
    Request(Request),
    Response(Response),
    Push(Push),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let msg = Message::Request(Request::new(
            7,
            Call::GetPageTree {
                page_id: Uuid::nil(),
            },
        ));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "request");
        assert_eq!(json["id"], 7);
        assert_eq!(json["call"]["op"], "get-page-tree");
        assert_eq!(
            json["call"]["payload"]["pageId"],
            "00000000-0000-0000-0000-000000000000"
        );
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_error_response_into_result() {
        let resp = Response::err(
            3,
            &RpcError::Core(grove_core::GroveError::not_found("block", "b1")),
        );
        let json = serde_json::to_value(Message::Response(resp.clone())).unwrap();
        assert_eq!(json["requestId"], 3);
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["errorType"], "not-found");

        match resp.into_result() {
            Err(RpcError::Remote { kind, message }) => {
                assert_eq!(kind, ErrorKind::NotFound);
                assert_eq!(message, "block not found: b1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_call_kinds_match_wire_names() {
        let calls = [
            (Call::Ping, "ping"),
            (Call::Query(Query::AllPages), "query"),
            (
                Call::ApplyOps {
                    ops: vec![],
                    options: ApplyOptions::default(),
                },
                "apply-ops",
            ),
        ];
        for (call, name) in calls {
            assert_eq!(call.kind().as_str(), name);
            assert_eq!(serde_json::to_value(&call).unwrap()["op"], name);
        }
    }
}
