//! Block operations: content edits and structural edits.

use std::collections::HashSet;

use grove_db::{Attr, EntityId, EntityRef, TxOp, Value};
use uuid::Uuid;

use crate::canonical::canonicalize;
use crate::errors::{GroveError, GroveResult};
use crate::model::{BlockPatch, NewBlock};
use crate::order_key::{key_between, keys_between};
use crate::parser::{extract_block_refs, extract_page_links};

use super::draft::Draft;
use super::read::{self, BLOCK_TYPE, PAGE_TYPE};
use super::{IndentOptions, OpResult};

pub(super) fn order_error(err: crate::order_key::OrderKeyError) -> GroveError {
    GroveError::Corrupt(format!("sibling order keys: {}", err))
}

fn keys(lo: Option<&str>, hi: Option<&str>, n: usize) -> GroveResult<Vec<String>> {
    keys_between(lo, hi, n).map_err(order_error)
}

// ============================================================================
// References
// ============================================================================

/// Assert `block/refs` for every page link and known block reference in
/// `content`. Links to missing pages create stub pages.
pub(super) fn emit_refs(d: &mut Draft<'_>, block: &EntityRef, content: &str) {
    let snap = d.snap();
    for title in extract_page_links(content) {
        let name = canonicalize(&title);
        if name.is_empty() {
            continue;
        }
        let target = if let Some(page) = read::page_by_name(snap, &name) {
            EntityRef::Id(page)
        } else {
            if d.pending_page(&name).is_none() {
                let id = Uuid::new_v4();
                let page = EntityRef::page_name(name.as_str());
                d.push(TxOp::ensure(Attr::PageName, name.as_str()));
                d.push(TxOp::assert(page.clone(), Attr::BlockUuid, id));
                d.push(TxOp::assert(page.clone(), Attr::BlockType, PAGE_TYPE));
                d.push(TxOp::assert(page.clone(), Attr::PageTitle, title.trim()));
                d.push(TxOp::assert(page.clone(), Attr::BlockCreatedAt, d.now()));
                d.push(TxOp::assert(page, Attr::BlockUpdatedAt, d.now()));
                d.record_pending_page(name.clone(), id);
            }
            EntityRef::page_name(name.as_str())
        };
        d.push(TxOp::assert(block.clone(), Attr::BlockRefs, target));
    }
    for id in extract_block_refs(content) {
        if let Some(target) = read::entity_of(snap, id) {
            d.push(TxOp::assert(block.clone(), Attr::BlockRefs, Value::Ref(target)));
        }
    }
}

// ============================================================================
// New block trees
// ============================================================================

/// Emit facts for a tree of new blocks placed under `parent` between `lo`
/// and `hi`. Returns the top-level ids with their order keys.
pub(super) fn emit_new_blocks(
    d: &mut Draft<'_>,
    blocks: &[NewBlock],
    parent: &EntityRef,
    page: &EntityRef,
    lo: Option<&str>,
    hi: Option<&str>,
    seen: &mut HashSet<Uuid>,
) -> GroveResult<Vec<(Uuid, String)>> {
    let orders = keys(lo, hi, blocks.len())?;
    let mut emitted = Vec::with_capacity(blocks.len());
    for (block, order) in blocks.iter().zip(orders) {
        let id = block.id.unwrap_or_else(Uuid::new_v4);
        if !seen.insert(id) || read::entity_of(d.snap(), id).is_some() {
            return Err(GroveError::Conflict(format!("block id {} already exists", id)));
        }
        let this = EntityRef::block(id);
        d.push(TxOp::ensure(Attr::BlockUuid, id));
        d.push(TxOp::assert(this.clone(), Attr::BlockType, BLOCK_TYPE));
        d.push(TxOp::assert(this.clone(), Attr::BlockContent, block.content.as_str()));
        d.push(TxOp::assert(this.clone(), Attr::BlockParent, parent.clone()));
        d.push(TxOp::assert(this.clone(), Attr::BlockPage, page.clone()));
        d.push(TxOp::assert(this.clone(), Attr::BlockOrder, order.as_str()));
        if !block.properties.is_empty() {
            d.push(TxOp::assert(
                this.clone(),
                Attr::BlockProperties,
                Value::Map(block.properties.clone()),
            ));
        }
        d.push(TxOp::assert(this.clone(), Attr::BlockCreatedAt, d.now()));
        d.push(TxOp::assert(this.clone(), Attr::BlockUpdatedAt, d.now()));
        emit_refs(d, &this, &block.content);

        emit_new_blocks(d, &block.children, &this, page, None, None, seen)?;
        emitted.push((id, order));
    }
    Ok(emitted)
}

// ============================================================================
// Selection helpers
// ============================================================================

/// Resolve ids to live blocks, dropping duplicates and blocks whose ancestor
/// is also selected.
fn selection(d: &Draft<'_>, ids: &[Uuid]) -> GroveResult<Vec<(Uuid, EntityId)>> {
    let mut resolved: Vec<(Uuid, EntityId)> = Vec::new();
    for id in ids {
        let e = read::require_block(d.snap(), *id)?;
        if !resolved.iter().any(|(_, r)| *r == e) {
            resolved.push((*id, e));
        }
    }
    let mut top = Vec::with_capacity(resolved.len());
    for (id, e) in &resolved {
        let mut nested = false;
        for (_, other) in &resolved {
            if other != e && d.is_ancestor_or_self(*other, *e)? {
                nested = true;
                break;
            }
        }
        if !nested {
            top.push((*id, *e));
        }
    }
    Ok(top)
}

/// A selection of adjacent siblings sorted by order, with their parent and
/// siblings.
struct Run {
    parent: EntityId,
    siblings: Vec<EntityId>,
    first: usize,
    last: usize,
}

fn sibling_run(d: &Draft<'_>, selected: &[(Uuid, EntityId)]) -> GroveResult<Run> {
    let Some((_, head)) = selected.first() else {
        return Err(GroveError::invalid("no blocks selected"));
    };
    let parent = d
        .parent(*head)
        .ok_or_else(|| GroveError::Corrupt(format!("block {} has no parent", head)))?;
    let siblings = d.children(parent);
    let mut positions = Vec::with_capacity(selected.len());
    for (id, e) in selected {
        match siblings.iter().position(|s| s == e) {
            Some(pos) => positions.push(pos),
            None => {
                return Err(GroveError::invalid(format!(
                    "block {} is not a sibling of the rest of the selection",
                    id
                )))
            }
        }
    }
    positions.sort_unstable();
    let first = positions[0];
    let last = positions[positions.len() - 1];
    if last - first + 1 != positions.len() {
        return Err(GroveError::invalid("selected blocks are not adjacent"));
    }
    Ok(Run {
        parent,
        siblings,
        first,
        last,
    })
}

// ============================================================================
// Operations
// ============================================================================

pub(crate) fn save_block(d: &mut Draft<'_>, id: Uuid, patch: &BlockPatch) -> GroveResult<OpResult> {
    let snap = d.snap();
    let e = match read::entity_of(snap, id) {
        Some(e) if read::is_page(snap, e) || read::parent_of(snap, e).is_some() => e,
        _ => return Err(GroveError::not_found("block", id)),
    };

    if let Some(content) = &patch.content {
        d.push(TxOp::assert(e, Attr::BlockContent, content.as_str()));
    }
    if let Some(properties) = &patch.properties {
        if properties.is_empty() {
            d.push(TxOp::retract_attr(e, Attr::BlockProperties));
        } else {
            d.push(TxOp::assert(
                e,
                Attr::BlockProperties,
                Value::Map(properties.clone()),
            ));
        }
    }
    match (&patch.refs, &patch.content) {
        (Some(refs), _) => {
            d.push(TxOp::retract_attr(e, Attr::BlockRefs));
            for target in refs {
                let target_e = read::entity_of(snap, *target)
                    .ok_or_else(|| GroveError::not_found("block", target))?;
                d.push(TxOp::assert(e, Attr::BlockRefs, Value::Ref(target_e)));
            }
        }
        (None, Some(content)) => {
            d.push(TxOp::retract_attr(e, Attr::BlockRefs));
            emit_refs(d, &EntityRef::Id(e), content);
        }
        (None, None) => {}
    }
    d.stamp(e);
    d.touch(e);
    tracing::debug!("save-block {}", id);
    Ok(OpResult::Saved { id })
}

pub(crate) fn insert_blocks(
    d: &mut Draft<'_>,
    blocks: &[NewBlock],
    anchor: Uuid,
    sibling: bool,
) -> GroveResult<OpResult> {
    let snap = d.snap();
    let anchor_e = read::entity_of(snap, anchor)
        .filter(|e| read::is_page(snap, *e) || read::parent_of(snap, *e).is_some())
        .ok_or_else(|| GroveError::not_found("anchor", anchor))?;
    if blocks.is_empty() {
        return Ok(OpResult::Noop);
    }

    let (parent, lo, hi) = if sibling {
        if read::is_page(snap, anchor_e) {
            return Err(GroveError::invalid(format!(
                "cannot insert a sibling of page {}",
                anchor
            )));
        }
        let parent = d
            .parent(anchor_e)
            .ok_or_else(|| GroveError::Corrupt(format!("block {} has no parent", anchor)))?;
        let lo = d.order(anchor_e);
        let hi = d.next_sibling(anchor_e).and_then(|n| d.order(n));
        (parent, lo, hi)
    } else {
        let hi = d.children(anchor_e).first().and_then(|c| d.order(*c));
        (anchor_e, None, hi)
    };
    let page = d
        .page(parent)
        .ok_or_else(|| GroveError::Corrupt(format!("{} has no page", parent)))?;

    let mut seen = HashSet::new();
    let ids: Vec<Uuid> = emit_new_blocks(
        d,
        blocks,
        &EntityRef::Id(parent),
        &EntityRef::Id(page),
        lo.as_deref(),
        hi.as_deref(),
        &mut seen,
    )?
    .into_iter()
    .map(|(id, _)| id)
    .collect();
    d.touch(page);
    tracing::debug!("insert-blocks: {} top-level, {} total", ids.len(), seen.len());
    Ok(OpResult::Inserted { ids })
}

pub(crate) fn delete_blocks(d: &mut Draft<'_>, ids: &[Uuid], children: bool) -> GroveResult<OpResult> {
    let mut deleted = Vec::new();
    for id in ids {
        let snap = d.snap();
        let Some(e) = read::entity_of(snap, *id) else {
            continue;
        };
        if d.is_removed(e) {
            continue;
        }
        if read::is_page(snap, e) {
            return Err(GroveError::invalid(format!(
                "{} is a page; use delete-page",
                id
            )));
        }
        let Some(parent) = d.parent(e) else {
            continue;
        };

        if children {
            for desc in d.descendants(e)? {
                d.remove(desc);
            }
        } else {
            let kids = d.children(e);
            if !kids.is_empty() {
                let lo = d.order(e);
                let hi = d.next_sibling(e).and_then(|n| d.order(n));
                let orders = keys(lo.as_deref(), hi.as_deref(), kids.len())?;
                for (kid, order) in kids.into_iter().zip(orders) {
                    d.place(kid, parent, order)?;
                }
            }
        }
        d.remove(e);
        deleted.push(*id);
    }
    tracing::debug!("delete-blocks: {} removed (children: {})", deleted.len(), children);
    if deleted.is_empty() {
        Ok(OpResult::Noop)
    } else {
        Ok(OpResult::Deleted { ids: deleted })
    }
}

pub(crate) fn move_blocks(
    d: &mut Draft<'_>,
    ids: &[Uuid],
    target: Uuid,
    sibling: bool,
) -> GroveResult<OpResult> {
    let snap = d.snap();
    let target_e = read::entity_of(snap, target)
        .filter(|e| read::is_page(snap, *e) || read::parent_of(snap, *e).is_some())
        .ok_or_else(|| GroveError::not_found("target", target))?;
    let selected = selection(d, ids)?;
    if selected.is_empty() {
        return Ok(OpResult::Noop);
    }
    if sibling && selected.iter().any(|(_, e)| *e == target_e) {
        return Err(GroveError::invalid("cannot move a block next to itself"));
    }
    for (id, e) in &selected {
        if d.is_ancestor_or_self(*e, target_e)? {
            return Err(GroveError::CyclicMove {
                block: *id,
                target,
            });
        }
    }

    let moving: HashSet<EntityId> = selected.iter().map(|(_, e)| *e).collect();
    let (parent, lo, hi) = if sibling {
        if read::is_page(snap, target_e) {
            return Err(GroveError::invalid(format!(
                "cannot move blocks next to page {}",
                target
            )));
        }
        let parent = d
            .parent(target_e)
            .ok_or_else(|| GroveError::Corrupt(format!("block {} has no parent", target)))?;
        let siblings: Vec<EntityId> = d
            .children(parent)
            .into_iter()
            .filter(|s| !moving.contains(s))
            .collect();
        let pos = siblings.iter().position(|s| *s == target_e);
        let hi = pos
            .and_then(|p| siblings.get(p + 1))
            .and_then(|n| d.order(*n));
        (parent, d.order(target_e), hi)
    } else {
        let hi = d
            .children(target_e)
            .into_iter()
            .find(|c| !moving.contains(c))
            .and_then(|c| d.order(c));
        (target_e, None, hi)
    };

    let orders = keys(lo.as_deref(), hi.as_deref(), selected.len())?;
    for ((_, e), order) in selected.iter().zip(orders) {
        d.place(*e, parent, order)?;
    }
    tracing::debug!("move-blocks: {} blocks to {}", selected.len(), target);
    Ok(OpResult::Moved {
        ids: selected.into_iter().map(|(id, _)| id).collect(),
    })
}

/// Move the neighboring sibling to the other side of the selection.
pub(crate) fn move_blocks_up_down(d: &mut Draft<'_>, ids: &[Uuid], up: bool) -> GroveResult<OpResult> {
    let selected = selection(d, ids)?;
    if selected.is_empty() {
        return Ok(OpResult::Noop);
    }
    let run = sibling_run(d, &selected)?;
    let siblings = &run.siblings;

    if up {
        if run.first == 0 {
            return Ok(OpResult::Noop);
        }
        let neighbor = siblings[run.first - 1];
        let lo = d.order(siblings[run.last]);
        let hi = siblings.get(run.last + 1).and_then(|n| d.order(*n));
        let order = key_between(lo.as_deref(), hi.as_deref()).map_err(order_error)?;
        d.reorder(neighbor, order);
    } else {
        if run.last + 1 >= siblings.len() {
            return Ok(OpResult::Noop);
        }
        let neighbor = siblings[run.last + 1];
        let lo = run
            .first
            .checked_sub(1)
            .and_then(|p| d.order(siblings[p]));
        let hi = d.order(siblings[run.first]);
        let order = key_between(lo.as_deref(), hi.as_deref()).map_err(order_error)?;
        d.reorder(neighbor, order);
    }
    Ok(OpResult::Moved {
        ids: selected.into_iter().map(|(id, _)| id).collect(),
    })
}

pub(crate) fn indent_outdent_blocks(
    d: &mut Draft<'_>,
    ids: &[Uuid],
    indent: bool,
    options: &IndentOptions,
) -> GroveResult<OpResult> {
    let selected = selection(d, ids)?;
    if selected.is_empty() {
        return Ok(OpResult::Noop);
    }
    let run = sibling_run(d, &selected)?;
    let ordered: Vec<EntityId> = run.siblings[run.first..=run.last].to_vec();

    if indent {
        if run.first == 0 {
            return Ok(OpResult::Noop);
        }
        let new_parent = run.siblings[run.first - 1];
        let lo = d.children(new_parent).last().and_then(|c| d.order(*c));
        let orders = keys(lo.as_deref(), None, ordered.len())?;
        for (e, order) in ordered.iter().zip(orders) {
            d.place(*e, new_parent, order)?;
        }
    } else {
        let snap = d.snap();
        if read::is_page(snap, run.parent) {
            return Ok(OpResult::Noop);
        }
        let Some(grandparent) = d.parent(run.parent) else {
            return Ok(OpResult::Noop);
        };
        let right: Vec<EntityId> = run.siblings[run.last + 1..].to_vec();
        let lo = d.order(run.parent);
        let hi = d.next_sibling(run.parent).and_then(|n| d.order(n));
        let orders = keys(lo.as_deref(), hi.as_deref(), ordered.len())?;
        for (e, order) in ordered.iter().zip(orders) {
            d.place(*e, grandparent, order)?;
        }

        if options.carry_right_siblings && !right.is_empty() {
            if let Some(last) = ordered.last().copied() {
                let lo = d.children(last).last().and_then(|c| d.order(*c));
                let orders = keys(lo.as_deref(), None, right.len())?;
                for (e, order) in right.into_iter().zip(orders) {
                    d.place(e, last, order)?;
                }
            }
        }
    }
    tracing::debug!(
        "{} {} blocks",
        if indent { "indent" } else { "outdent" },
        ordered.len()
    );
    Ok(OpResult::Moved {
        ids: selected.into_iter().map(|(id, _)| id).collect(),
    })
}
