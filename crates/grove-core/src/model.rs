//! Domain types for the outliner: blocks, pages, trees and literals.
//!
//! All structs use camelCase for JSON serialization, matching the wire
//! protocol.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical::CanonicalName;

/// Open key/value block properties.
pub type Properties = BTreeMap<String, String>;

// ============================================================================
// BlockKind
// ============================================================================

/// Distinguishes ordinary blocks from page roots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    #[default]
    Block,
    Page,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Block => "block",
            BlockKind::Page => "page",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(BlockKind::Block),
            "page" => Ok(BlockKind::Page),
            other => Err(format!("unknown block kind '{}'", other)),
        }
    }
}

// ============================================================================
// Block / Page
// ============================================================================

/// A block as read from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: Uuid,
    pub content: String,
    /// Parent block or page. `None` only for pages.
    pub parent: Option<Uuid>,
    /// Owning page. `None` only for pages and placeholders.
    pub page: Option<Uuid>,
    pub order: Option<String>,
    pub kind: BlockKind,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub refs: BTreeSet<Uuid>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A page as read from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: Uuid,
    pub name: CanonicalName,
    pub title: String,
    /// Path of the file that is the primary source of this page.
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Mutation inputs
// ============================================================================

/// Changes to a block's mutable content fields.
///
/// Structural fields (parent, order) are never part of a patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Replaces the whole property map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    /// Replaces the whole reference set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<BTreeSet<Uuid>>,
}

impl BlockPatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }
}

/// A new block (optionally with nested children) to insert or import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBlock {
    /// Identity to use; minted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub content: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NewBlock>,
}

impl NewBlock {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_children(mut self, children: Vec<NewBlock>) -> Self {
        self.children = children;
        self
    }

    /// Number of blocks in this subtree, including self.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(NewBlock::subtree_len).sum::<usize>()
    }
}

/// A page with a nested block tree, used by batch import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLiteral {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    #[serde(default)]
    pub children: Vec<NewBlock>,
}

impl PageLiteral {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_children(mut self, children: Vec<NewBlock>) -> Self {
        self.children = children;
        self
    }
}

// ============================================================================
// Trees
// ============================================================================

/// A block with its ordered children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: Uuid,
    pub content: String,
    pub order: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn count(&self) -> usize {
        1 + self.children.iter().map(TreeNode::count).sum::<usize>()
    }
}

/// A page with its nested block tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageTree {
    pub page: Page,
    pub children: Vec<TreeNode>,
}

impl PageTree {
    /// Total number of blocks in the tree.
    pub fn block_count(&self) -> usize {
        self.children.iter().map(TreeNode::count).sum()
    }

    /// Depth-first list of `(depth, node)` pairs.
    pub fn flatten(&self) -> Vec<(usize, &TreeNode)> {
        fn walk<'a>(nodes: &'a [TreeNode], depth: usize, out: &mut Vec<(usize, &'a TreeNode)>) {
            for node in nodes {
                out.push((depth, node));
                walk(&node.children, depth + 1, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.children, 0, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_block_subtree_len() {
        let tree = NewBlock::new("a").with_children(vec![
            NewBlock::new("b"),
            NewBlock::new("c").with_children(vec![NewBlock::new("d")]),
        ]);
        assert_eq!(tree.subtree_len(), 4);
    }

    #[test]
    fn test_block_patch_json_omits_unset_fields() {
        let json = serde_json::to_string(&BlockPatch::content("x")).unwrap();
        assert_eq!(json, r#"{"content":"x"}"#);
    }

    #[test]
    fn test_block_kind_roundtrip() {
        assert_eq!("page".parse::<BlockKind>().unwrap(), BlockKind::Page);
        assert!("widget".parse::<BlockKind>().is_err());
    }
}
