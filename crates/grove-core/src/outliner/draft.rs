//! Pending changes for a single outliner operation.
//!
//! A [`Draft`] reads through to a snapshot but overlays the structural edits
//! made so far (new parents, orders, pages and removals), so a multi-block
//! operation can place each block relative to the ones it already moved.
//! Every edit is also recorded as a transaction op; nothing touches the
//! store until the engine commits [`Draft::finish`].

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use grove_db::{Attr, EntityId, EntityRef, Snapshot, Transaction, TxOp, Value};
use uuid::Uuid;

use crate::canonical::CanonicalName;
use crate::errors::{GroveError, GroveResult};

use super::read::{self, MAX_DEPTH};

pub(crate) struct Draft<'s> {
    snap: &'s Snapshot,
    now: DateTime<Utc>,
    tx: Transaction,
    affected: BTreeSet<Uuid>,
    parents: HashMap<EntityId, EntityId>,
    orders: HashMap<EntityId, String>,
    pages: HashMap<EntityId, EntityId>,
    removed: HashSet<EntityId>,
    /// Pages created by this draft, by canonical name.
    pending_pages: HashMap<CanonicalName, Uuid>,
}

impl<'s> Draft<'s> {
    pub fn new(snap: &'s Snapshot, label: &str) -> Self {
        Self {
            snap,
            now: Utc::now(),
            tx: Transaction::labeled(label),
            affected: BTreeSet::new(),
            parents: HashMap::new(),
            orders: HashMap::new(),
            pages: HashMap::new(),
            removed: HashSet::new(),
            pending_pages: HashMap::new(),
        }
    }

    pub fn snap(&self) -> &'s Snapshot {
        self.snap
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn push(&mut self, op: TxOp) {
        self.tx.push(op);
    }

    pub fn pending_page(&self, name: &CanonicalName) -> Option<Uuid> {
        self.pending_pages.get(name).copied()
    }

    pub fn record_pending_page(&mut self, name: CanonicalName, id: Uuid) {
        self.pending_pages.insert(name, id);
    }

    // -------------------------------------------------------------------------
    // Overlay reads
    // -------------------------------------------------------------------------

    pub fn is_removed(&self, e: EntityId) -> bool {
        self.removed.contains(&e)
    }

    pub fn parent(&self, e: EntityId) -> Option<EntityId> {
        self.parents
            .get(&e)
            .copied()
            .or_else(|| read::parent_of(self.snap, e))
    }

    pub fn order(&self, e: EntityId) -> Option<String> {
        self.orders
            .get(&e)
            .cloned()
            .or_else(|| read::order_of(self.snap, e).map(str::to_string))
    }

    pub fn page(&self, e: EntityId) -> Option<EntityId> {
        self.pages
            .get(&e)
            .copied()
            .or_else(|| read::page_of(self.snap, e))
    }

    /// Live children of `parent`, sorted by order key.
    pub fn children(&self, parent: EntityId) -> Vec<EntityId> {
        let mut kids: HashSet<EntityId> = read::children(self.snap, parent)
            .into_iter()
            .filter(|k| self.parents.get(k).map_or(true, |p| *p == parent))
            .collect();
        kids.extend(
            self.parents
                .iter()
                .filter(|(_, p)| **p == parent)
                .map(|(k, _)| *k),
        );
        let mut sorted: Vec<(String, EntityId)> = kids
            .into_iter()
            .filter(|k| !self.removed.contains(k))
            .map(|k| (self.order(k).unwrap_or_default(), k))
            .collect();
        sorted.sort();
        sorted.into_iter().map(|(_, k)| k).collect()
    }

    /// Siblings of `e`, including `e`, sorted by order key.
    pub fn siblings(&self, e: EntityId) -> Vec<EntityId> {
        match self.parent(e) {
            Some(p) => self.children(p),
            None => vec![e],
        }
    }

    pub fn next_sibling(&self, e: EntityId) -> Option<EntityId> {
        let siblings = self.siblings(e);
        let pos = siblings.iter().position(|s| *s == e)?;
        siblings.get(pos + 1).copied()
    }

    /// Every descendant of `e` in depth-first pre-order.
    pub fn descendants(&self, e: EntityId) -> GroveResult<Vec<EntityId>> {
        let mut out = Vec::new();
        let mut stack: Vec<(EntityId, usize)> = self
            .children(e)
            .into_iter()
            .rev()
            .map(|c| (c, 1))
            .collect();
        while let Some((node, depth)) = stack.pop() {
            if depth > MAX_DEPTH {
                return Err(GroveError::Corrupt(format!(
                    "subtree of {} exceeds depth {}",
                    e, MAX_DEPTH
                )));
            }
            out.push(node);
            stack.extend(self.children(node).into_iter().rev().map(|c| (c, depth + 1)));
        }
        Ok(out)
    }

    /// Whether `ancestor` is `e` or lies on its parent chain.
    pub fn is_ancestor_or_self(&self, ancestor: EntityId, e: EntityId) -> GroveResult<bool> {
        let mut cursor = Some(e);
        for _ in 0..=MAX_DEPTH {
            match cursor {
                None => return Ok(false),
                Some(node) if node == ancestor => return Ok(true),
                Some(node) => cursor = self.parent(node),
            }
        }
        Err(GroveError::Corrupt(format!(
            "parent chain of {} exceeds depth {}",
            e, MAX_DEPTH
        )))
    }

    // -------------------------------------------------------------------------
    // Edits
    // -------------------------------------------------------------------------

    /// Record that the page holding `e` changed.
    pub fn touch(&mut self, e: EntityId) {
        if let Some(page) = self.page(e) {
            if let Some(id) = read::uuid_of(self.snap, page) {
                self.affected.insert(id);
            }
        }
    }

    pub fn touch_page_id(&mut self, id: Uuid) {
        self.affected.insert(id);
    }

    /// Stamp `updated-at` on an existing entity.
    pub fn stamp(&mut self, e: EntityId) {
        self.tx
            .push(TxOp::assert(e, Attr::BlockUpdatedAt, Value::Instant(self.now)));
    }

    /// Re-parent `e` under `parent` with a new order key. The new page is
    /// propagated to the whole subtree when it changes.
    pub fn place(&mut self, e: EntityId, parent: EntityId, order: String) -> GroveResult<()> {
        let old_page = self.page(e);
        let new_page = self.page(parent);
        self.touch(e);

        self.parents.insert(e, parent);
        self.orders.insert(e, order.clone());
        self.tx.push(TxOp::assert(e, Attr::BlockParent, Value::Ref(parent)));
        self.tx.push(TxOp::assert(e, Attr::BlockOrder, order));
        self.stamp(e);

        if new_page != old_page {
            if let Some(page) = new_page {
                let mut subtree = vec![e];
                subtree.extend(self.descendants(e)?);
                for node in subtree {
                    self.pages.insert(node, page);
                    self.tx.push(TxOp::assert(node, Attr::BlockPage, Value::Ref(page)));
                }
            }
        }
        self.touch(e);
        Ok(())
    }

    /// Give `e` a new order key among its current siblings.
    pub fn reorder(&mut self, e: EntityId, order: String) {
        self.orders.insert(e, order.clone());
        self.tx.push(TxOp::assert(e, Attr::BlockOrder, order));
        self.stamp(e);
        self.touch(e);
    }

    /// Retract `e` and every reference to it.
    pub fn remove(&mut self, e: EntityId) {
        self.touch(e);
        self.removed.insert(e);
        self.tx.push(TxOp::retract_entity(EntityRef::Id(e)));
    }

    pub fn finish(self) -> (Transaction, BTreeSet<Uuid>) {
        (self.tx, self.affected)
    }
}
