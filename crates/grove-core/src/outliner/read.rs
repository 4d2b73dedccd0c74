//! Snapshot readers shared by the outliner operations.

use std::collections::BTreeSet;

use grove_db::{Attr, EntityId, Snapshot, Value};
use uuid::Uuid;

use crate::canonical::{canonicalize, CanonicalName};
use crate::errors::{GroveError, GroveResult};
use crate::model::{Block, BlockKind, Page, Properties};

/// Parent chains longer than this are treated as corrupt.
pub const MAX_DEPTH: usize = 1024;

pub const PAGE_TYPE: &str = "page";
pub const BLOCK_TYPE: &str = "block";

pub fn entity_of(snap: &Snapshot, id: Uuid) -> Option<EntityId> {
    snap.lookup(Attr::BlockUuid, &Value::Uuid(id))
}

pub fn uuid_of(snap: &Snapshot, e: EntityId) -> Option<Uuid> {
    snap.get(e, Attr::BlockUuid).and_then(Value::as_uuid)
}

pub fn is_page(snap: &Snapshot, e: EntityId) -> bool {
    snap.get(e, Attr::BlockType).and_then(Value::as_str) == Some(PAGE_TYPE)
}

/// Resolve a block id that must exist and must not be a page.
pub fn require_block(snap: &Snapshot, id: Uuid) -> GroveResult<EntityId> {
    match entity_of(snap, id) {
        Some(e) if is_page(snap, e) => Err(GroveError::invalid(format!(
            "{} is a page, not a block",
            id
        ))),
        Some(e) if snap.get(e, Attr::BlockParent).is_some() => Ok(e),
        _ => Err(GroveError::not_found("block", id)),
    }
}

/// Resolve an id that must be a page.
pub fn require_page(snap: &Snapshot, id: Uuid) -> GroveResult<EntityId> {
    match entity_of(snap, id) {
        Some(e) if is_page(snap, e) => Ok(e),
        _ => Err(GroveError::not_found("page", id)),
    }
}

pub fn page_by_name(snap: &Snapshot, name: &CanonicalName) -> Option<EntityId> {
    snap.lookup(Attr::PageName, &Value::Str(name.as_str().to_string()))
}

/// Look up a page by any spelling of its title.
pub fn page_by_title(snap: &Snapshot, title: &str) -> Option<EntityId> {
    page_by_name(snap, &canonicalize(title))
}

pub fn parent_of(snap: &Snapshot, e: EntityId) -> Option<EntityId> {
    snap.get(e, Attr::BlockParent).and_then(Value::as_ref_id)
}

pub fn order_of(snap: &Snapshot, e: EntityId) -> Option<&str> {
    snap.get(e, Attr::BlockOrder).and_then(Value::as_str)
}

/// Owning page; a page owns itself.
pub fn page_of(snap: &Snapshot, e: EntityId) -> Option<EntityId> {
    if is_page(snap, e) {
        return Some(e);
    }
    snap.get(e, Attr::BlockPage).and_then(Value::as_ref_id)
}

pub fn content_of(snap: &Snapshot, e: EntityId) -> &str {
    snap.get(e, Attr::BlockContent)
        .and_then(Value::as_str)
        .unwrap_or("")
}

pub fn properties_of(snap: &Snapshot, e: EntityId) -> Properties {
    snap.get(e, Attr::BlockProperties)
        .and_then(Value::as_map)
        .cloned()
        .unwrap_or_default()
}

/// Path of the file a page is the primary source of.
pub fn file_of_page(snap: &Snapshot, page: EntityId) -> Option<String> {
    let file = snap.get(page, Attr::PageFile).and_then(Value::as_ref_id)?;
    snap.get(file, Attr::FilePath)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Children of `parent` sorted by order key, ties broken by entity id.
pub fn children(snap: &Snapshot, parent: EntityId) -> Vec<EntityId> {
    let mut kids: Vec<(String, EntityId)> = snap
        .referrers(parent, Attr::BlockParent)
        .into_iter()
        .map(|e| (order_of(snap, e).unwrap_or("").to_string(), e))
        .collect();
    kids.sort();
    kids.into_iter().map(|(_, e)| e).collect()
}

/// Every block whose `page` attribute points at `page`.
pub fn blocks_of_page(snap: &Snapshot, page: EntityId) -> Vec<EntityId> {
    snap.referrers(page, Attr::BlockPage)
}

pub fn read_block(snap: &Snapshot, e: EntityId) -> Option<Block> {
    let id = uuid_of(snap, e)?;
    let kind = if is_page(snap, e) {
        BlockKind::Page
    } else {
        BlockKind::Block
    };
    let refs: BTreeSet<Uuid> = snap
        .get_many(e, Attr::BlockRefs)
        .iter()
        .filter_map(Value::as_ref_id)
        .filter_map(|target| uuid_of(snap, target))
        .collect();
    Some(Block {
        id,
        content: content_of(snap, e).to_string(),
        parent: parent_of(snap, e).and_then(|p| uuid_of(snap, p)),
        page: match kind {
            BlockKind::Page => None,
            BlockKind::Block => snap
                .get(e, Attr::BlockPage)
                .and_then(Value::as_ref_id)
                .and_then(|p| uuid_of(snap, p)),
        },
        order: order_of(snap, e).map(str::to_string),
        kind,
        refs,
        properties: properties_of(snap, e),
        created_at: snap.get(e, Attr::BlockCreatedAt).and_then(Value::as_instant),
        updated_at: snap.get(e, Attr::BlockUpdatedAt).and_then(Value::as_instant),
    })
}

pub fn read_page(snap: &Snapshot, e: EntityId) -> Option<Page> {
    if !is_page(snap, e) {
        return None;
    }
    let name = snap.get(e, Attr::PageName).and_then(Value::as_str)?;
    Some(Page {
        id: uuid_of(snap, e)?,
        name: canonicalize(name),
        title: snap
            .get(e, Attr::PageTitle)
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string(),
        file: file_of_page(snap, e),
        properties: properties_of(snap, e),
        created_at: snap.get(e, Attr::BlockCreatedAt).and_then(Value::as_instant),
        updated_at: snap.get(e, Attr::BlockUpdatedAt).and_then(Value::as_instant),
    })
}

/// Every page in the snapshot, sorted by canonical name.
pub fn all_pages(snap: &Snapshot) -> Vec<Page> {
    let mut pages: Vec<Page> = snap
        .entities_with(Attr::PageName)
        .into_iter()
        .filter_map(|e| read_page(snap, e))
        .collect();
    pages.sort_by(|a, b| a.name.cmp(&b.name));
    pages
}
