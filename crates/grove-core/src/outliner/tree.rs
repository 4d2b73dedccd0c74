//! Read-only page tree reconstruction.

use grove_db::{EntityId, Snapshot};
use uuid::Uuid;

use crate::errors::{GroveError, GroveResult};
use crate::model::{PageTree, TreeNode};

use super::read::{self, MAX_DEPTH};

fn build_nodes(snap: &Snapshot, parent: EntityId, depth: usize) -> GroveResult<Vec<TreeNode>> {
    if depth > MAX_DEPTH {
        return Err(GroveError::Corrupt(format!(
            "tree under {} exceeds depth {}",
            parent, MAX_DEPTH
        )));
    }
    read::children(snap, parent)
        .into_iter()
        .filter_map(|e| read::uuid_of(snap, e).map(|id| (e, id)))
        .map(|(e, id)| {
            Ok(TreeNode {
                id,
                content: read::content_of(snap, e).to_string(),
                order: read::order_of(snap, e).unwrap_or("").to_string(),
                properties: read::properties_of(snap, e),
                children: build_nodes(snap, e, depth + 1)?,
            })
        })
        .collect()
}

/// Nested block tree of a page, or `None` if the id is not a page.
pub fn get_page_tree(snap: &Snapshot, page_id: Uuid) -> GroveResult<Option<PageTree>> {
    let Some(e) = read::entity_of(snap, page_id) else {
        return Ok(None);
    };
    let Some(page) = read::read_page(snap, e) else {
        return Ok(None);
    };
    let children = build_nodes(snap, e, 0)?;
    Ok(Some(PageTree { page, children }))
}

/// Page trees for several pages; ids that no longer resolve are skipped.
pub fn get_pages_for_file_sync(snap: &Snapshot, page_ids: &[Uuid]) -> GroveResult<Vec<PageTree>> {
    let mut trees = Vec::with_capacity(page_ids.len());
    for id in page_ids {
        if let Some(tree) = get_page_tree(snap, *id)? {
            trees.push(tree);
        }
    }
    Ok(trees)
}
