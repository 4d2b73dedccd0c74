//! Graph schema: attributes, values, and entity ids.
//!
//! The store is schema-aware: every attribute declares whether it is an
//! identity (unique), whether it holds one or many values, and which value
//! type it accepts. The outliner engine only ever writes facts through these
//! attributes.
//!
//! ## JSON Encoding
//!
//! Values are serialized with an explicit type tag so that UUIDs, instants,
//! maps and references survive a round trip through any JSON transport:
//!
//! ```json
//! {"type": "uuid", "value": "6f1c..."}
//! {"type": "instant", "value": "2025-11-28T10:00:00Z"}
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// EntityId
// ============================================================================

/// Internal entity id assigned by the store.
///
/// Entity ids are stable for the life of an entity and never reused by a
/// store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Returns the raw id value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Attr
// ============================================================================

/// The closed set of attributes known to the graph store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Attr {
    /// Stable block/page identity.
    #[serde(rename = "block/uuid")]
    BlockUuid,
    /// Raw block text.
    #[serde(rename = "block/content")]
    BlockContent,
    /// Parent block or page.
    #[serde(rename = "block/parent")]
    BlockParent,
    /// Owning page (denormalized).
    #[serde(rename = "block/page")]
    BlockPage,
    /// Sibling order key.
    #[serde(rename = "block/order")]
    BlockOrder,
    /// Block kind tag (`block` or `page`).
    #[serde(rename = "block/type")]
    BlockType,
    /// Referenced blocks and pages.
    #[serde(rename = "block/refs")]
    BlockRefs,
    /// Open key/value properties.
    #[serde(rename = "block/properties")]
    BlockProperties,
    #[serde(rename = "block/created-at")]
    BlockCreatedAt,
    #[serde(rename = "block/updated-at")]
    BlockUpdatedAt,
    /// Canonical page name.
    #[serde(rename = "page/name")]
    PageName,
    /// Human-readable page title.
    #[serde(rename = "page/title")]
    PageTitle,
    /// File that is the primary source of the page.
    #[serde(rename = "page/file")]
    PageFile,
    /// File path identity.
    #[serde(rename = "file/path")]
    FilePath,
    /// Last known file text.
    #[serde(rename = "file/content")]
    FileContent,
}

/// Value type accepted by an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Str,
    Int,
    Bool,
    Uuid,
    Instant,
    Map,
    Ref,
}

impl Attr {
    /// All attributes, in schema order.
    pub const ALL: [Attr; 15] = [
        Attr::BlockUuid,
        Attr::BlockContent,
        Attr::BlockParent,
        Attr::BlockPage,
        Attr::BlockOrder,
        Attr::BlockType,
        Attr::BlockRefs,
        Attr::BlockProperties,
        Attr::BlockCreatedAt,
        Attr::BlockUpdatedAt,
        Attr::PageName,
        Attr::PageTitle,
        Attr::PageFile,
        Attr::FilePath,
        Attr::FileContent,
    ];

    /// The attribute's keyword-style identifier.
    pub fn ident(&self) -> &'static str {
        match self {
            Attr::BlockUuid => "block/uuid",
            Attr::BlockContent => "block/content",
            Attr::BlockParent => "block/parent",
            Attr::BlockPage => "block/page",
            Attr::BlockOrder => "block/order",
            Attr::BlockType => "block/type",
            Attr::BlockRefs => "block/refs",
            Attr::BlockProperties => "block/properties",
            Attr::BlockCreatedAt => "block/created-at",
            Attr::BlockUpdatedAt => "block/updated-at",
            Attr::PageName => "page/name",
            Attr::PageTitle => "page/title",
            Attr::PageFile => "page/file",
            Attr::FilePath => "file/path",
            Attr::FileContent => "file/content",
        }
    }

    /// Identity attributes are unique across the store and can be used in
    /// lookups.
    pub fn is_unique(&self) -> bool {
        matches!(self, Attr::BlockUuid | Attr::PageName | Attr::FilePath)
    }

    /// Cardinality-many attributes hold a set of values.
    pub fn is_many(&self) -> bool {
        matches!(self, Attr::BlockRefs)
    }

    /// Reference attributes point at other entities.
    pub fn is_ref(&self) -> bool {
        matches!(self.value_type(), ValueType::Ref)
    }

    /// The value type accepted by this attribute.
    pub fn value_type(&self) -> ValueType {
        match self {
            Attr::BlockUuid => ValueType::Uuid,
            Attr::BlockContent
            | Attr::BlockOrder
            | Attr::BlockType
            | Attr::PageName
            | Attr::PageTitle
            | Attr::FilePath
            | Attr::FileContent => ValueType::Str,
            Attr::BlockParent | Attr::BlockPage | Attr::BlockRefs | Attr::PageFile => {
                ValueType::Ref
            }
            Attr::BlockProperties => ValueType::Map,
            Attr::BlockCreatedAt | Attr::BlockUpdatedAt => ValueType::Instant,
        }
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.ident())
    }
}

// ============================================================================
// Value
// ============================================================================

/// A fact value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Uuid(Uuid),
    Instant(DateTime<Utc>),
    Map(BTreeMap<String, String>),
    Ref(EntityId),
}

impl Value {
    /// The value's type.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Str(_) => ValueType::Str,
            Value::Int(_) => ValueType::Int,
            Value::Bool(_) => ValueType::Bool,
            Value::Uuid(_) => ValueType::Uuid,
            Value::Instant(_) => ValueType::Instant,
            Value::Map(_) => ValueType::Map,
            Value::Ref(_) => ValueType::Ref,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_ref_id(&self) -> Option<EntityId> {
        match self {
            Value::Ref(e) => Some(*e),
            _ => None,
        }
    }

    pub fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Instant(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Uuid(u) => write!(f, "#uuid \"{}\"", u),
            Value::Instant(t) => write!(f, "#inst \"{}\"", t.to_rfc3339()),
            Value::Map(m) => write!(f, "{:?}", m),
            Value::Ref(e) => write!(f, "{}", e),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Instant(t)
    }
}

impl From<EntityId> for Value {
    fn from(e: EntityId) -> Self {
        Value::Ref(e)
    }
}

// ============================================================================
// Tests
// ============================================================================
