//! Static routing of operations between the local and remote backend.

use crate::error::{RpcError, RpcResult};
use crate::wire::OpKind;

/// Where an operation may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Only meaningful against the remote backend.
    RemoteOnly,
    /// Runs remotely once the remote is known to be populated, else locally.
    PreferRemote,
    /// Always local; depends on capabilities only the client process has.
    DefaultLocal,
}

/// Classification of every operation.
pub fn classify(op: OpKind) -> RouteClass {
    match op {
        OpKind::Ping | OpKind::Evict => RouteClass::RemoteOnly,
        OpKind::ApplyOps | OpKind::Query | OpKind::GetPageTree | OpKind::GetPagesForFileSync => {
            RouteClass::PreferRemote
        }
        // Reads and writes the client's own files.
        OpKind::LoadGraph | OpKind::ExportPages => RouteClass::DefaultLocal,
    }
}

/// Chosen backend for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Local,
    Remote,
}

/// Which backends can currently take calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Availability {
    pub local: bool,
    /// Set explicitly; never inferred from traffic.
    pub remote: bool,
}

/// Pick a backend for `op`.
///
/// Pure: the answer depends only on the classification and `available`.
///
/// # Errors
///
/// Returns [`RpcError::NoBackendAvailable`] when no permitted backend is
/// available.
pub fn route(op: OpKind, available: Availability) -> RpcResult<Route> {
    let chosen = match classify(op) {
        RouteClass::RemoteOnly => available.remote.then_some(Route::Remote),
        RouteClass::PreferRemote => {
            if available.remote {
                Some(Route::Remote)
            } else {
                available.local.then_some(Route::Local)
            }
        }
        RouteClass::DefaultLocal => available.local.then_some(Route::Local),
    };
    chosen.ok_or(RpcError::NoBackendAvailable { op: op.as_str() })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: Availability = Availability {
        local: true,
        remote: true,
    };
    const LOCAL: Availability = Availability {
        local: true,
        remote: false,
    };
    const REMOTE: Availability = Availability {
        local: false,
        remote: true,
    };

    #[test]
    fn test_every_op_is_classified() {
        for op in OpKind::ALL {
            // Nothing available never routes anywhere.
            assert!(matches!(
                route(op, Availability::default()),
                Err(RpcError::NoBackendAvailable { .. })
            ));
        }
    }

    #[test]
    fn test_routing_table() {
        assert_eq!(route(OpKind::Query, BOTH).unwrap(), Route::Remote);
        assert_eq!(route(OpKind::Query, LOCAL).unwrap(), Route::Local);
        assert_eq!(route(OpKind::GetPageTree, REMOTE).unwrap(), Route::Remote);

        assert_eq!(route(OpKind::ApplyOps, BOTH).unwrap(), Route::Remote);
        assert_eq!(route(OpKind::ApplyOps, LOCAL).unwrap(), Route::Local);
        assert_eq!(route(OpKind::LoadGraph, BOTH).unwrap(), Route::Local);
        assert!(route(OpKind::ExportPages, REMOTE).is_err());

        assert_eq!(route(OpKind::Ping, BOTH).unwrap(), Route::Remote);
        let err = route(OpKind::Evict, LOCAL).unwrap_err();
        assert_eq!(err.to_string(), "No backend available for evict");
    }
}
