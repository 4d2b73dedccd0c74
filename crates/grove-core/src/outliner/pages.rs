//! Page operations and batch import.

use std::collections::{HashMap, HashSet};

use grove_db::{Attr, EntityRef, TxOp, Value};
use uuid::Uuid;

use crate::canonical::{canonicalize, CanonicalName};
use crate::errors::{GroveError, GroveResult};
use crate::model::{PageLiteral, Properties};

use super::blocks::emit_new_blocks;
use super::draft::Draft;
use super::read::{self, PAGE_TYPE};
use super::{ImportOptions, OpResult};

/// Emit the facts of a brand new page.
fn emit_page(d: &mut Draft<'_>, id: Uuid, title: &str, name: &CanonicalName, properties: &Properties) {
    let page = EntityRef::block(id);
    d.push(TxOp::ensure(Attr::BlockUuid, id));
    d.push(TxOp::assert(page.clone(), Attr::BlockType, PAGE_TYPE));
    d.push(TxOp::assert(page.clone(), Attr::PageName, name.as_str()));
    d.push(TxOp::assert(page.clone(), Attr::PageTitle, title.trim()));
    if !properties.is_empty() {
        d.push(TxOp::assert(
            page.clone(),
            Attr::BlockProperties,
            Value::Map(properties.clone()),
        ));
    }
    d.push(TxOp::assert(page.clone(), Attr::BlockCreatedAt, d.now()));
    d.push(TxOp::assert(page, Attr::BlockUpdatedAt, d.now()));
    d.record_pending_page(name.clone(), id);
    d.touch_page_id(id);
}

fn checked_name(title: &str) -> GroveResult<CanonicalName> {
    let name = canonicalize(title);
    if name.is_empty() {
        return Err(GroveError::invalid(format!(
            "page title {:?} is empty after canonicalization",
            title
        )));
    }
    Ok(name)
}

pub(crate) fn create_page(d: &mut Draft<'_>, title: &str, uuid: Option<Uuid>) -> GroveResult<OpResult> {
    let snap = d.snap();
    let name = checked_name(title)?;
    if read::page_by_name(snap, &name).is_some() {
        return Err(GroveError::Conflict(format!("page '{}' already exists", name)));
    }
    let id = uuid.unwrap_or_else(Uuid::new_v4);
    if read::entity_of(snap, id).is_some() {
        return Err(GroveError::Conflict(format!("id {} is already in use", id)));
    }
    emit_page(d, id, title, &name, &Properties::new());
    tracing::debug!("create-page '{}' ({})", name, id);
    Ok(OpResult::PageCreated { id, name })
}

/// Rewrite `[[...]]` links whose canonical name is `old` to `[[new_title]]`.
/// Returns `None` when nothing changed.
pub fn rewrite_links(content: &str, old: &CanonicalName, new_title: &str) -> Option<String> {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    let mut changed = false;
    while let Some(start) = rest.find("[[") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("]]") else {
            break;
        };
        out.push_str(&rest[..start]);
        let inner = &after[..end];
        if canonicalize(inner) == *old {
            out.push_str("[[");
            out.push_str(new_title);
            out.push_str("]]");
            changed = true;
        } else {
            out.push_str(&rest[start..start + 2 + end + 2]);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    changed.then_some(out)
}

pub(crate) fn rename_page(d: &mut Draft<'_>, id: Uuid, title: &str) -> GroveResult<OpResult> {
    let snap = d.snap();
    let page = read::require_page(snap, id)?;
    let name = checked_name(title)?;
    if let Some(holder) = read::page_by_name(snap, &name) {
        if holder != page {
            return Err(GroveError::Conflict(format!(
                "another page is already named '{}'",
                name
            )));
        }
    }
    let old_name = snap
        .get(page, Attr::PageName)
        .and_then(Value::as_str)
        .map(canonicalize)
        .ok_or_else(|| GroveError::Corrupt(format!("page {} has no name", id)))?;

    d.push(TxOp::assert(page, Attr::PageName, name.as_str()));
    d.push(TxOp::assert(page, Attr::PageTitle, title.trim()));
    d.stamp(page);
    d.touch_page_id(id);

    let mut rewritten = 0;
    for referrer in snap.referrers(page, Attr::BlockRefs) {
        let content = read::content_of(snap, referrer);
        if let Some(updated) = rewrite_links(content, &old_name, title.trim()) {
            d.push(TxOp::assert(referrer, Attr::BlockContent, updated));
            d.stamp(referrer);
            d.touch(referrer);
            rewritten += 1;
        }
    }
    tracing::debug!(
        "rename-page {} '{}' -> '{}', {} links rewritten",
        id,
        old_name,
        name,
        rewritten
    );
    Ok(OpResult::PageRenamed { id, name })
}

pub(crate) fn delete_page(d: &mut Draft<'_>, id: Uuid) -> GroveResult<OpResult> {
    let snap = d.snap();
    let page = read::require_page(snap, id)?;
    let blocks = read::blocks_of_page(snap, page);
    d.touch_page_id(id);
    for block in &blocks {
        d.remove(*block);
    }
    d.remove(page);
    tracing::debug!("delete-page {}: {} blocks", id, blocks.len());
    Ok(OpResult::PageDeleted {
        id,
        blocks: blocks.len(),
    })
}

pub(crate) fn batch_import(
    d: &mut Draft<'_>,
    pages: &[PageLiteral],
    options: &ImportOptions,
) -> GroveResult<OpResult> {
    let snap = d.snap();
    let mut seen_blocks: HashSet<Uuid> = HashSet::new();
    // canonical name -> (page id, order key of the last top-level block)
    let mut seen_pages: HashMap<CanonicalName, (Uuid, Option<String>)> = HashMap::new();
    let mut page_count = 0;

    for literal in pages {
        let name = checked_name(&literal.title)?;
        let existing = read::page_by_name(snap, &name);

        let (page_id, tail) = match (existing, seen_pages.get(&name)) {
            (_, Some(_)) if !options.merge_existing => {
                return Err(GroveError::Conflict(format!(
                    "page '{}' appears twice in the import",
                    name
                )));
            }
            (_, Some((id, tail))) => (*id, tail.clone()),
            (Some(_), None) if !options.merge_existing => {
                return Err(GroveError::Conflict(format!("page '{}' already exists", name)));
            }
            (Some(page), None) => {
                let id = read::uuid_of(snap, page)
                    .ok_or_else(|| GroveError::Corrupt(format!("page '{}' has no id", name)))?;
                let tail = d.children(page).last().and_then(|c| d.order(*c));
                d.touch_page_id(id);
                (id, tail)
            }
            (None, None) => {
                let id = literal.uuid.unwrap_or_else(Uuid::new_v4);
                if read::entity_of(snap, id).is_some() || !seen_blocks.insert(id) {
                    return Err(GroveError::Conflict(format!("id {} is already in use", id)));
                }
                emit_page(d, id, &literal.title, &name, &literal.properties);
                page_count += 1;
                (id, None)
            }
        };

        let page_ref = EntityRef::block(page_id);
        let emitted = emit_new_blocks(
            d,
            &literal.children,
            &page_ref,
            &page_ref,
            tail.as_deref(),
            None,
            &mut seen_blocks,
        )?;
        let tail = emitted.last().map(|(_, order)| order.clone()).or(tail);
        seen_pages.insert(name, (page_id, tail));
    }

    let block_count = pages
        .iter()
        .flat_map(|p| p.children.iter())
        .map(|b| b.subtree_len())
        .sum();
    tracing::debug!("batch-import: {} pages, {} blocks", page_count, block_count);
    Ok(OpResult::Imported {
        page_count,
        block_count,
    })
}
