//! Transactions: ordered lists of fact assertions and retractions.
//!
//! A [`Transaction`] is applied atomically by a [`crate::DatomStore`]: either
//! every operation is applied or none is.
//!
//! ## Identity Before Reference
//!
//! Entities are addressed either by [`EntityId`] or by an identity lookup
//! (`[:block/uuid U]`). A lookup must resolve at the moment the operation is
//! applied, so identities have to be declared with [`TxOp::Ensure`] before any
//! later operation in the same transaction refers to them. Builders that emit
//! large transactions rely on this ordering.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{Attr, EntityId, Value};

// ============================================================================
// EntityRef / TxValue
// ============================================================================

/// How a transaction operation addresses an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityRef {
    /// A concrete store entity id.
    Id(EntityId),
    /// An identity lookup on a unique attribute.
    Lookup(Attr, Value),
}

impl EntityRef {
    /// Lookup by block (or page) UUID.
    pub fn block(id: Uuid) -> Self {
        EntityRef::Lookup(Attr::BlockUuid, Value::Uuid(id))
    }

    /// Lookup by canonical page name.
    pub fn page_name(name: impl Into<String>) -> Self {
        EntityRef::Lookup(Attr::PageName, Value::Str(name.into()))
    }

    /// Lookup by file path.
    pub fn file(path: impl Into<String>) -> Self {
        EntityRef::Lookup(Attr::FilePath, Value::Str(path.into()))
    }
}

impl From<EntityId> for EntityRef {
    fn from(id: EntityId) -> Self {
        EntityRef::Id(id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Id(id) => write!(f, "{}", id),
            EntityRef::Lookup(attr, value) => write!(f, "[{} {}]", attr, value),
        }
    }
}

/// A value inside a transaction: either a literal or an entity reference that
/// is resolved when the operation is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TxValue {
    Value(Value),
    Ref(EntityRef),
}

impl From<Value> for TxValue {
    fn from(v: Value) -> Self {
        TxValue::Value(v)
    }
}

macro_rules! tx_value_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for TxValue {
            fn from(v: $ty) -> Self {
                TxValue::Value(Value::from(v))
            }
        })*
    };
}

tx_value_from!(&str, String, Uuid, chrono::DateTime<chrono::Utc>, EntityId);

impl From<EntityRef> for TxValue {
    fn from(r: EntityRef) -> Self {
        TxValue::Ref(r)
    }
}

// ============================================================================
// TxOp
// ============================================================================

/// A single transaction operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum TxOp {
    /// Declare an identity: creates a placeholder entity holding only this
    /// unique attribute if no entity holds it yet, otherwise does nothing.
    Ensure { attr: Attr, value: Value },

    /// Assert a fact. Cardinality-one attributes replace the previous value.
    Assert {
        entity: EntityRef,
        attr: Attr,
        value: TxValue,
    },

    /// Retract one value, or every value of the attribute when `value` is
    /// `None`. Retracting from a missing entity is a no-op.
    Retract {
        entity: EntityRef,
        attr: Attr,
        value: Option<TxValue>,
    },

    /// Retract every fact of the entity and every reference pointing at it.
    /// Retracting a missing entity is a no-op.
    RetractEntity { entity: EntityRef },
}

impl TxOp {
    pub fn ensure(attr: Attr, value: impl Into<Value>) -> Self {
        TxOp::Ensure {
            attr,
            value: value.into(),
        }
    }

    pub fn assert(entity: impl Into<EntityRef>, attr: Attr, value: impl Into<TxValue>) -> Self {
        TxOp::Assert {
            entity: entity.into(),
            attr,
            value: value.into(),
        }
    }

    pub fn retract_attr(entity: impl Into<EntityRef>, attr: Attr) -> Self {
        TxOp::Retract {
            entity: entity.into(),
            attr,
            value: None,
        }
    }

    pub fn retract_value(
        entity: impl Into<EntityRef>,
        attr: Attr,
        value: impl Into<TxValue>,
    ) -> Self {
        TxOp::Retract {
            entity: entity.into(),
            attr,
            value: Some(value.into()),
        }
    }

    pub fn retract_entity(entity: impl Into<EntityRef>) -> Self {
        TxOp::RetractEntity {
            entity: entity.into(),
        }
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// An ordered list of operations applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Operations in application order.
    pub ops: Vec<TxOp>,

    /// Optional label, carried into logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty transaction with a label.
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            ops: Vec::new(),
            label: Some(label.into()),
        }
    }

    pub fn push(&mut self, op: TxOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl Extend<TxOp> for Transaction {
    fn extend<I: IntoIterator<Item = TxOp>>(&mut self, iter: I) {
        self.ops.extend(iter);
    }
}

impl From<Vec<TxOp>> for Transaction {
    fn from(ops: Vec<TxOp>) -> Self {
        Self { ops, label: None }
    }
}

// ============================================================================
// Datom / TxReport
// ============================================================================

/// A resolved fact as recorded by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datom {
    pub e: EntityId,
    pub a: Attr,
    pub v: Value,
    /// `true` for assertions, `false` for retractions.
    pub added: bool,
}

/// Result of a committed transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReport {
    /// Store basis before the transaction.
    pub basis_before: u64,

    /// Store basis after the transaction.
    pub basis_after: u64,

    /// Resolved datoms, in application order.
    pub datoms: Vec<Datom>,

    /// Entities created by the transaction.
    pub created: Vec<EntityId>,
}

impl TxReport {
    /// Every entity touched by the transaction, including ref targets.
    pub fn touched_entities(&self) -> BTreeSet<EntityId> {
        let mut out = BTreeSet::new();
        for d in &self.datoms {
            out.insert(d.e);
            if let Value::Ref(target) = &d.v {
                out.insert(*target);
            }
        }
        out
    }
}
