//! Outliner tree engine.
//!
//! Every mutation is expressed as an [`Op`]. The engine runs an op against a
//! snapshot through a [`draft::Draft`], which yields one transaction plus the
//! set of pages the op touched. The engine commits that transaction under
//! its writer lock, so each op is all-or-nothing.
//!
//! ## Affected Pages
//!
//! Ops report every page whose rendered content may have changed, including
//! pages only reached indirectly (the source page of a move, the pages of
//! blocks whose links were rewritten by a rename). [`crate::GroveEngine::apply_ops`]
//! returns the union across the batch.

mod blocks;
mod draft;
mod pages;
pub mod read;
pub mod tree;

pub use pages::rewrite_links;
pub use tree::{get_page_tree, get_pages_for_file_sync};

pub(crate) use draft::Draft;

use std::collections::BTreeSet;

use grove_db::{Snapshot, Transaction, TxReport, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical::CanonicalName;
use crate::errors::{ErrorKind, GroveResult};
use crate::model::{BlockPatch, NewBlock, PageLiteral};

fn default_true() -> bool {
    true
}

// ============================================================================
// Options
// ============================================================================

/// Options for [`Op::IndentOutdentBlocks`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndentOptions {
    /// On outdent, make the right siblings of the selection children of its
    /// last block instead of leaving them under the old parent.
    #[serde(default)]
    pub carry_right_siblings: bool,
}

/// Options for [`Op::BatchImport`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    /// Append to pages that already exist instead of failing with a conflict.
    #[serde(default)]
    pub merge_existing: bool,
}

/// Options for [`crate::GroveEngine::apply_ops`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOptions {
    /// Label carried into every transaction of the batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

// ============================================================================
// Op
// ============================================================================

/// One outliner operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Op {
    /// Merge a patch into a block's content fields.
    SaveBlock { id: Uuid, patch: BlockPatch },

    /// Insert new blocks after `anchor` (sibling) or as its first children.
    InsertBlocks {
        blocks: Vec<NewBlock>,
        anchor: Uuid,
        #[serde(default = "default_true")]
        sibling: bool,
    },

    /// Delete blocks, with or without their descendants.
    DeleteBlocks {
        ids: Vec<Uuid>,
        #[serde(default = "default_true")]
        children: bool,
    },

    /// Re-parent blocks next to or under `target`.
    MoveBlocks {
        ids: Vec<Uuid>,
        target: Uuid,
        #[serde(default = "default_true")]
        sibling: bool,
    },

    /// Move adjacent sibling blocks one position up or down.
    MoveBlocksUpDown { ids: Vec<Uuid>, up: bool },

    IndentOutdentBlocks {
        ids: Vec<Uuid>,
        indent: bool,
        #[serde(default)]
        options: IndentOptions,
    },

    CreatePage {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uuid: Option<Uuid>,
    },

    RenamePage { id: Uuid, title: String },

    DeletePage { id: Uuid },

    /// Materialize nested page literals.
    BatchImport {
        pages: Vec<PageLiteral>,
        #[serde(default)]
        options: ImportOptions,
    },

    /// Apply a raw transaction. Bypasses the tree rules.
    Transact { tx: Transaction },
}

impl Op {
    /// Stable operation name, used as the transaction label and in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Op::SaveBlock { .. } => "save-block",
            Op::InsertBlocks { .. } => "insert-blocks",
            Op::DeleteBlocks { .. } => "delete-blocks",
            Op::MoveBlocks { .. } => "move-blocks",
            Op::MoveBlocksUpDown { .. } => "move-blocks-up-down",
            Op::IndentOutdentBlocks { .. } => "indent-outdent-blocks",
            Op::CreatePage { .. } => "create-page",
            Op::RenamePage { .. } => "rename-page",
            Op::DeletePage { .. } => "delete-page",
            Op::BatchImport { .. } => "batch-import",
            Op::Transact { .. } => "transact",
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// What an op did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum OpResult {
    Saved { id: Uuid },
    Inserted { ids: Vec<Uuid> },
    Deleted { ids: Vec<Uuid> },
    Moved { ids: Vec<Uuid> },
    PageCreated { id: Uuid, name: CanonicalName },
    PageRenamed { id: Uuid, name: CanonicalName },
    PageDeleted { id: Uuid, blocks: usize },
    #[serde(rename_all = "camelCase")]
    Imported { page_count: usize, block_count: usize },
    Transacted { basis: u64, datoms: usize },
    /// Nothing to do (boundary moves, deletes of missing ids).
    Noop,
}

impl OpResult {
    pub fn is_noop(&self) -> bool {
        matches!(self, OpResult::Noop)
    }
}

/// Result of one committed op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpOutcome {
    pub result: OpResult,
    pub affected_pages: BTreeSet<Uuid>,
}

/// The op that stopped an [`crate::GroveEngine::apply_ops`] batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpFailure {
    /// Position of the failed op in the batch.
    pub index: usize,
    pub kind: ErrorKind,
    pub message: String,
}

/// Result of a batch of ops.
///
/// Ops before a failure stay applied; `affected_pages` covers exactly those.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    /// Result of the last op that did something.
    pub result: Option<OpResult>,
    pub affected_pages: BTreeSet<Uuid>,
    /// Number of ops committed.
    pub applied: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<OpFailure>,
}

impl ApplyOutcome {
    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }
}

// ============================================================================
// Execution
// ============================================================================

/// Run a tree op against a draft. `Op::Transact` is handled by the engine.
pub(crate) fn execute(d: &mut Draft<'_>, op: &Op) -> GroveResult<OpResult> {
    match op {
        Op::SaveBlock { id, patch } => blocks::save_block(d, *id, patch),
        Op::InsertBlocks {
            blocks,
            anchor,
            sibling,
        } => blocks::insert_blocks(d, blocks, *anchor, *sibling),
        Op::DeleteBlocks { ids, children } => blocks::delete_blocks(d, ids, *children),
        Op::MoveBlocks {
            ids,
            target,
            sibling,
        } => blocks::move_blocks(d, ids, *target, *sibling),
        Op::MoveBlocksUpDown { ids, up } => blocks::move_blocks_up_down(d, ids, *up),
        Op::IndentOutdentBlocks {
            ids,
            indent,
            options,
        } => blocks::indent_outdent_blocks(d, ids, *indent, options),
        Op::CreatePage { title, uuid } => pages::create_page(d, title, *uuid),
        Op::RenamePage { id, title } => pages::rename_page(d, *id, title),
        Op::DeletePage { id } => pages::delete_page(d, *id),
        Op::BatchImport { pages, options } => pages::batch_import(d, pages, options),
        Op::Transact { .. } => Err(crate::errors::GroveError::invalid(
            "raw transactions are not tree operations",
        )),
    }
}

/// Pages touched by a raw transaction, judged against the snapshots before
/// and after it.
pub(crate) fn pages_touched_by(before: &Snapshot, after: &Snapshot, report: &TxReport) -> BTreeSet<Uuid> {
    let mut out = BTreeSet::new();
    for datom in &report.datoms {
        for snap in [before, after] {
            if let Some(page) = read::page_of(snap, datom.e) {
                if let Some(id) = read::uuid_of(snap, page) {
                    out.insert(id);
                }
            }
            if datom.a == grove_db::Attr::BlockPage {
                if let Value::Ref(page) = &datom.v {
                    if let Some(id) = read::uuid_of(snap, *page) {
                        out.insert(id);
                    }
                }
            }
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::GroveEngine;
    use crate::errors::GroveError;
    use crate::model::PageTree;

    struct Fixture {
        engine: GroveEngine,
        page: Uuid,
    }

    impl Fixture {
        fn new() -> Self {
            let engine = GroveEngine::in_memory();
            let page = match engine.create_page("Inbox", None).unwrap().result {
                OpResult::PageCreated { id, .. } => id,
                other => panic!("unexpected result {other:?}"),
            };
            Self { engine, page }
        }

        fn insert_child(&self, anchor: Uuid, content: &str) -> Uuid {
            self.insert(anchor, content, false)
        }

        fn insert_after(&self, anchor: Uuid, content: &str) -> Uuid {
            self.insert(anchor, content, true)
        }

        fn insert(&self, anchor: Uuid, content: &str, sibling: bool) -> Uuid {
            let outcome = self
                .engine
                .insert_blocks(vec![NewBlock::new(content)], anchor, sibling)
                .unwrap();
            match outcome.result {
                OpResult::Inserted { ids } => ids[0],
                other => panic!("unexpected result {other:?}"),
            }
        }

        fn tree(&self) -> PageTree {
            self.tree_of(self.page)
        }

        fn tree_of(&self, page: Uuid) -> PageTree {
            self.engine.get_page_tree(page).unwrap().unwrap()
        }

        /// Outline as `depth:content` strings in document order.
        fn outline(&self) -> Vec<String> {
            self.tree()
                .flatten()
                .into_iter()
                .map(|(depth, node)| format!("{}:{}", depth, node.content))
                .collect()
        }

        /// a, b (with b1, b2), c at the top level.
        fn seeded(&self) -> [Uuid; 5] {
            let a = self.insert_child(self.page, "a");
            let b = self.insert_after(a, "b");
            let c = self.insert_after(b, "c");
            let b1 = self.insert_child(b, "b1");
            let b2 = self.insert_after(b1, "b2");
            [a, b, c, b1, b2]
        }
    }

    #[test]
    fn test_insert_orders_siblings() {
        let f = Fixture::new();
        let a = f.insert_child(f.page, "a");
        let c = f.insert_after(a, "c");
        f.insert_after(a, "b");
        f.insert_child(f.page, "first");
        f.insert_after(c, "d");
        assert_eq!(f.outline(), ["0:first", "0:a", "0:b", "0:c", "0:d"]);
    }

    #[test]
    fn test_insert_nested_literal() {
        let f = Fixture::new();
        let outcome = f
            .engine
            .insert_blocks(
                vec![
                    NewBlock::new("x").with_children(vec![NewBlock::new("x1"), NewBlock::new("x2")]),
                    NewBlock::new("y"),
                ],
                f.page,
                false,
            )
            .unwrap();
        assert!(outcome.affected_pages.contains(&f.page));
        assert_eq!(f.outline(), ["0:x", "1:x1", "1:x2", "0:y"]);
    }

    #[test]
    fn test_insert_missing_anchor() {
        let f = Fixture::new();
        let err = f
            .engine
            .insert_blocks(vec![NewBlock::new("x")], Uuid::new_v4(), true)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_save_block_keeps_structure() {
        let f = Fixture::new();
        let [a, ..] = f.seeded();
        let before = f.engine.block(a).unwrap().unwrap();
        f.engine
            .save_block(a, BlockPatch::content("a edited"))
            .unwrap();
        let after = f.engine.block(a).unwrap().unwrap();
        assert_eq!(after.content, "a edited");
        assert_eq!(after.parent, before.parent);
        assert_eq!(after.order, before.order);
        assert!(after.updated_at >= before.updated_at);

        let err = f
            .engine
            .save_block(Uuid::new_v4(), BlockPatch::content("x"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_save_block_links_create_stub_pages() {
        let f = Fixture::new();
        let [a, ..] = f.seeded();
        f.engine
            .save_block(a, BlockPatch::content("see [[Reading List]]"))
            .unwrap();
        let snap = f.engine.snapshot().unwrap();
        let stub = read::page_by_title(&snap, "reading list").unwrap();
        let block = f.engine.block(a).unwrap().unwrap();
        assert!(block.refs.contains(&read::uuid_of(&snap, stub).unwrap()));
    }

    #[test]
    fn test_delete_with_children() {
        let f = Fixture::new();
        let [_, b, _, b1, b2] = f.seeded();
        let outcome = f.engine.delete_blocks(vec![b], true).unwrap();
        assert_eq!(outcome.result, OpResult::Deleted { ids: vec![b] });
        assert_eq!(f.outline(), ["0:a", "0:c"]);
        assert!(f.engine.block(b1).unwrap().is_none());
        assert!(f.engine.block(b2).unwrap().is_none());
    }

    #[test]
    fn test_delete_promotes_children_in_order() {
        let f = Fixture::new();
        let [_, b, ..] = f.seeded();
        f.engine.delete_blocks(vec![b], false).unwrap();
        assert_eq!(f.outline(), ["0:a", "0:b1", "0:b2", "0:c"]);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let f = Fixture::new();
        let [a, ..] = f.seeded();
        f.engine.delete_blocks(vec![a], true).unwrap();
        let outcome = f.engine.delete_blocks(vec![a, Uuid::new_v4()], true).unwrap();
        assert!(outcome.result.is_noop());
    }

    #[test]
    fn test_move_into_descendant_is_rejected() {
        let f = Fixture::new();
        let [_, b, _, b1, _] = f.seeded();
        let before = f.outline();
        let err = f.engine.move_blocks(vec![b], b1, false).unwrap_err();
        assert!(matches!(err, GroveError::CyclicMove { .. }));
        let err = f.engine.move_blocks(vec![b], b, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CyclicMove);
        assert_eq!(f.outline(), before);
    }

    #[test]
    fn test_move_as_child_and_sibling() {
        let f = Fixture::new();
        let [a, b, c, ..] = f.seeded();
        f.engine.move_blocks(vec![c], a, false).unwrap();
        assert_eq!(f.outline(), ["0:a", "1:c", "0:b", "1:b1", "1:b2"]);
        f.engine.move_blocks(vec![a], b, true).unwrap();
        assert_eq!(f.outline(), ["0:b", "1:b1", "1:b2", "0:a", "1:c"]);
    }

    #[test]
    fn test_move_across_pages_reports_both() {
        let f = Fixture::new();
        let [_, b, ..] = f.seeded();
        let other = match f.engine.create_page("Archive", None).unwrap().result {
            OpResult::PageCreated { id, .. } => id,
            other => panic!("unexpected result {other:?}"),
        };
        let outcome = f
            .engine
            .apply_ops(
                &[Op::MoveBlocks {
                    ids: vec![b],
                    target: other,
                    sibling: false,
                }],
                &ApplyOptions::default(),
            )
            .unwrap();
        assert!(outcome.is_ok());
        assert!(outcome.affected_pages.contains(&f.page));
        assert!(outcome.affected_pages.contains(&other));

        let moved = f.tree_of(other);
        assert_eq!(moved.block_count(), 3);
        let snap = f.engine.snapshot().unwrap();
        for (_, node) in moved.flatten() {
            let block = read::read_block(&snap, read::entity_of(&snap, node.id).unwrap()).unwrap();
            assert_eq!(block.page, Some(other));
        }
    }

    #[test]
    fn test_move_up_down_boundaries() {
        let f = Fixture::new();
        let [a, _, c, ..] = f.seeded();
        assert!(f.engine.move_blocks_up_down(vec![a], true).unwrap().result.is_noop());
        assert!(f.engine.move_blocks_up_down(vec![c], false).unwrap().result.is_noop());
        f.engine.move_blocks_up_down(vec![c], true).unwrap();
        assert_eq!(f.outline(), ["0:a", "0:c", "0:b", "1:b1", "1:b2"]);
        f.engine.move_blocks_up_down(vec![a], false).unwrap();
        assert_eq!(f.outline(), ["0:c", "0:a", "0:b", "1:b1", "1:b2"]);
    }

    #[test]
    fn test_indent_and_outdent() {
        let f = Fixture::new();
        let [a, _, c, b1, _] = f.seeded();
        assert!(f
            .engine
            .indent_outdent_blocks(vec![a], true, IndentOptions::default())
            .unwrap()
            .result
            .is_noop());
        assert!(f
            .engine
            .indent_outdent_blocks(vec![a], false, IndentOptions::default())
            .unwrap()
            .result
            .is_noop());

        f.engine
            .indent_outdent_blocks(vec![c], true, IndentOptions::default())
            .unwrap();
        assert_eq!(f.outline(), ["0:a", "0:b", "1:b1", "1:b2", "1:c"]);

        f.engine
            .indent_outdent_blocks(vec![b1], false, IndentOptions::default())
            .unwrap();
        assert_eq!(f.outline(), ["0:a", "0:b", "1:b2", "1:c", "0:b1"]);
    }

    #[test]
    fn test_outdent_carrying_right_siblings() {
        let f = Fixture::new();
        let [_, _, _, b1, _] = f.seeded();
        f.engine
            .indent_outdent_blocks(
                vec![b1],
                false,
                IndentOptions {
                    carry_right_siblings: true,
                },
            )
            .unwrap();
        assert_eq!(f.outline(), ["0:a", "0:b", "0:b1", "1:b2", "0:c"]);
    }

    #[test]
    fn test_page_create_rename_delete() {
        let f = Fixture::new();
        let err = f.engine.create_page("  INBOX ", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let [a, ..] = f.seeded();
        let notes = match f.engine.create_page("Notes", None).unwrap().result {
            OpResult::PageCreated { id, .. } => id,
            other => panic!("unexpected result {other:?}"),
        };
        let err = f.engine.rename_page(notes, "inbox").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        f.engine
            .save_block(a, BlockPatch::content("todo for [[Notes]]"))
            .unwrap();
        let outcome = f.engine.rename_page(notes, "Journal").unwrap();
        assert!(outcome.affected_pages.contains(&f.page));
        assert_eq!(f.engine.block(a).unwrap().unwrap().content, "todo for [[Journal]]");

        let snap = f.engine.snapshot().unwrap();
        assert!(read::page_by_title(&snap, "journal").is_some());
        assert!(read::page_by_title(&snap, "notes").is_none());

        let outcome = f.engine.delete_page(f.page).unwrap();
        assert_eq!(
            outcome.result,
            OpResult::PageDeleted {
                id: f.page,
                blocks: 5
            }
        );
        assert!(f.engine.get_page_tree(f.page).unwrap().is_none());
        assert!(f.engine.block(a).unwrap().is_none());
    }

    #[test]
    fn test_batch_import_counts() {
        let engine = GroveEngine::in_memory();
        let literal = PageLiteral::new("Imported").with_children(vec![
            NewBlock::new("one").with_children(vec![NewBlock::new("one.a")]),
            NewBlock::new("two").with_property("status", "done"),
        ]);
        let outcome = engine.batch_import(vec![literal.clone()], ImportOptions::default()).unwrap();
        assert_eq!(
            outcome.result,
            OpResult::Imported {
                page_count: 1,
                block_count: 3
            }
        );
        let err = engine
            .batch_import(vec![literal.clone()], ImportOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        engine
            .batch_import(
                vec![PageLiteral::new("imported").with_children(vec![NewBlock::new("three")])],
                ImportOptions {
                    merge_existing: true,
                },
            )
            .unwrap();
        let page = engine.page_by_title("Imported").unwrap().unwrap();
        let tree = engine.get_page_tree(page.id).unwrap().unwrap();
        let top: Vec<&str> = tree.children.iter().map(|n| n.content.as_str()).collect();
        assert_eq!(top, ["one", "two", "three"]);
    }

    #[test]
    fn test_apply_ops_union_and_partial_failure() {
        let f = Fixture::new();
        let [a, b, ..] = f.seeded();
        let other = Uuid::new_v4();
        let ops = vec![
            Op::CreatePage {
                title: "Other".into(),
                uuid: Some(other),
            },
            Op::MoveBlocks {
                ids: vec![a],
                target: other,
                sibling: false,
            },
            Op::MoveBlocks {
                ids: vec![b],
                target: Uuid::new_v4(),
                sibling: false,
            },
            Op::DeleteBlocks {
                ids: vec![b],
                children: true,
            },
        ];
        let outcome = f.engine.apply_ops(&ops, &ApplyOptions::default()).unwrap();
        assert_eq!(outcome.applied, 2);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.index, 2);
        assert_eq!(failure.kind, ErrorKind::NotFound);
        assert_eq!(
            outcome.affected_pages,
            [f.page, other].into_iter().collect::<BTreeSet<_>>()
        );
        assert!(matches!(outcome.result, Some(OpResult::Moved { .. })));
        // the op after the failure did not run
        assert!(f.engine.block(b).unwrap().is_some());
    }

    #[test]
    fn test_raw_transact_reports_pages() {
        let f = Fixture::new();
        let [a, ..] = f.seeded();
        let tx = Transaction::from(vec![grove_db::TxOp::assert(
            grove_db::EntityRef::block(a),
            grove_db::Attr::BlockContent,
            "raw",
        )]);
        let outcome = f.engine.run(&Op::Transact { tx }).unwrap();
        assert!(matches!(outcome.result, OpResult::Transacted { .. }));
        assert_eq!(
            outcome.affected_pages,
            [f.page].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn test_op_json_shape() {
        let op: Op = serde_json::from_str(
            r#"{"op":"delete-blocks","ids":["6a3c1a1e-8d0b-4d8e-9d55-2f1b7f0e5c11"]}"#,
        )
        .unwrap();
        assert!(matches!(op, Op::DeleteBlocks { children: true, .. }));
    }
}
