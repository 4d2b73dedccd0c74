//! Immutable point-in-time views of the store and the index that backs them.
//!
//! A [`Snapshot`] is an `Arc` around an index value. Writers apply a
//! transaction to a private copy of the index and then publish the copy, so a
//! snapshot taken before a commit never observes any part of it. The copy
//! shares its tables with the published index and only duplicates what the
//! transaction touches.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{DbError, DbResult};
use crate::layered::Layered;
use crate::schema::{Attr, EntityId, Value};
use crate::tx::{Datom, EntityRef, Transaction, TxOp, TxReport, TxValue};

// ============================================================================
// Index
// ============================================================================

/// In-memory index over all current facts.
#[derive(Debug, Clone, Default)]
pub(crate) struct Index {
    basis: u64,
    next_id: u64,
    /// entity -> attribute -> values
    eav: Layered<EntityId, BTreeMap<Attr, Vec<Value>>>,
    /// unique attribute values -> holder
    avet: Layered<(Attr, Value), EntityId>,
    /// (attribute, entity) for every entity holding the attribute
    aevt: Layered<(Attr, EntityId), ()>,
    /// (ref target, attribute, source)
    vaet: Layered<(EntityId, Attr, EntityId), ()>,
}

/// Attribute bounds for tuple range scans.
const FIRST_ATTR: Attr = Attr::BlockUuid;
const LAST_ATTR: Attr = Attr::FileContent;

const MIN_ID: EntityId = EntityId(0);
const MAX_ID: EntityId = EntityId(u64::MAX);

impl Index {
    pub(crate) fn basis(&self) -> u64 {
        self.basis
    }

    fn alloc(&mut self) -> EntityId {
        self.next_id += 1;
        EntityId(self.next_id)
    }

    fn add(&mut self, e: EntityId, a: Attr, v: Value) {
        if a.is_unique() {
            self.avet.insert((a, v.clone()), e);
        }
        if let Value::Ref(target) = &v {
            self.vaet.insert((*target, a, e), ());
        }
        if !self.aevt.contains_key(&(a, e)) {
            self.aevt.insert((a, e), ());
        }
        self.eav.get_or_default(e).entry(a).or_default().push(v);
    }

    fn remove(&mut self, e: EntityId, a: Attr, v: &Value) -> bool {
        let held = self
            .eav
            .get(&e)
            .and_then(|attrs| attrs.get(&a))
            .is_some_and(|values| values.contains(v));
        if !held {
            return false;
        }
        let Some(attrs) = self.eav.get_mut(&e) else {
            return false;
        };
        let mut attr_emptied = false;
        if let Some(values) = attrs.get_mut(&a) {
            if let Some(pos) = values.iter().position(|x| x == v) {
                values.remove(pos);
            }
            attr_emptied = values.is_empty();
        }
        if attr_emptied {
            attrs.remove(&a);
        }
        let entity_emptied = attrs.is_empty();
        if attr_emptied {
            self.aevt.remove(&(a, e));
        }
        if entity_emptied {
            self.eav.remove(&e);
        }
        if a.is_unique() {
            self.avet.remove(&(a, v.clone()));
        }
        if let Value::Ref(target) = v {
            self.vaet.remove(&(*target, a, e));
        }
        true
    }

    fn compact(&mut self) {
        self.eav.compact();
        self.avet.compact();
        self.aevt.compact();
        self.vaet.compact();
    }

    fn resolve(&self, r: &EntityRef) -> Option<EntityId> {
        match r {
            EntityRef::Id(id) => self.eav.contains_key(id).then_some(*id),
            EntityRef::Lookup(attr, value) => {
                if !attr.is_unique() {
                    return None;
                }
                self.avet.get(&(*attr, value.clone())).copied()
            }
        }
    }

    fn resolve_required(&self, r: &EntityRef) -> DbResult<EntityId> {
        self.resolve(r).ok_or_else(|| DbError::unresolved(r))
    }

    fn resolve_value(&self, attr: Attr, value: &TxValue) -> DbResult<Value> {
        let v = match value {
            TxValue::Value(Value::Ref(id)) => {
                Value::Ref(self.resolve_required(&EntityRef::Id(*id))?)
            }
            TxValue::Value(v) => v.clone(),
            TxValue::Ref(r) => Value::Ref(self.resolve_required(r)?),
        };
        if v.value_type() != attr.value_type() {
            return Err(DbError::type_mismatch(
                attr,
                format!("expected {:?}, got {:?}", attr.value_type(), v.value_type()),
            ));
        }
        Ok(v)
    }

    /// Apply a transaction in place, returning the report.
    ///
    /// Callers apply to a private copy so that an error leaves the published
    /// index untouched.
    pub(crate) fn apply(&mut self, tx: &Transaction) -> DbResult<TxReport> {
        let mut report = TxReport {
            basis_before: self.basis,
            ..TxReport::default()
        };

        for op in &tx.ops {
            match op {
                TxOp::Ensure { attr, value } => {
                    if !attr.is_unique() {
                        return Err(DbError::NotIdentity { attr: *attr });
                    }
                    if value.value_type() != attr.value_type() {
                        return Err(DbError::type_mismatch(*attr, "identity value type"));
                    }
                    if self.avet.contains_key(&(*attr, value.clone())) {
                        continue;
                    }
                    let e = self.alloc();
                    self.add(e, *attr, value.clone());
                    report.created.push(e);
                    report.datoms.push(Datom {
                        e,
                        a: *attr,
                        v: value.clone(),
                        added: true,
                    });
                }
                TxOp::Assert {
                    entity,
                    attr,
                    value,
                } => {
                    let e = self.resolve_required(entity)?;
                    let v = self.resolve_value(*attr, value)?;
                    self.assert_one(e, *attr, v, &mut report)?;
                }
                TxOp::Retract {
                    entity,
                    attr,
                    value,
                } => {
                    let Some(e) = self.resolve(entity) else {
                        continue;
                    };
                    let targets: Vec<Value> = match value {
                        Some(v) => match self.resolve_value(*attr, v) {
                            Ok(v) => vec![v],
                            Err(DbError::UnresolvedEntity { .. }) => continue,
                            Err(err) => return Err(err),
                        },
                        None => self
                            .eav
                            .get(&e)
                            .and_then(|attrs| attrs.get(attr))
                            .cloned()
                            .unwrap_or_default(),
                    };
                    for v in targets {
                        if self.remove(e, *attr, &v) {
                            report.datoms.push(Datom {
                                e,
                                a: *attr,
                                v,
                                added: false,
                            });
                        }
                    }
                }
                TxOp::RetractEntity { entity } => {
                    let Some(e) = self.resolve(entity) else {
                        continue;
                    };
                    self.retract_entity(e, &mut report);
                }
            }
        }

        self.basis += 1;
        report.basis_after = self.basis;
        self.compact();
        Ok(report)
    }

    fn assert_one(
        &mut self,
        e: EntityId,
        attr: Attr,
        v: Value,
        report: &mut TxReport,
    ) -> DbResult<()> {
        if attr.is_unique() {
            if let Some(holder) = self.avet.get(&(attr, v.clone())) {
                if *holder != e {
                    return Err(DbError::UniqueViolation {
                        attr,
                        value: v.to_string(),
                        holder: holder.value(),
                    });
                }
                return Ok(());
            }
        }

        let existing = self
            .eav
            .get(&e)
            .and_then(|attrs| attrs.get(&attr))
            .cloned()
            .unwrap_or_default();
        if existing.contains(&v) {
            return Ok(());
        }
        if !attr.is_many() {
            for old in existing {
                self.remove(e, attr, &old);
                report.datoms.push(Datom {
                    e,
                    a: attr,
                    v: old,
                    added: false,
                });
            }
        }
        self.add(e, attr, v.clone());
        report.datoms.push(Datom {
            e,
            a: attr,
            v,
            added: true,
        });
        Ok(())
    }

    fn retract_entity(&mut self, e: EntityId, report: &mut TxReport) {
        let incoming: Vec<(Attr, EntityId)> = self
            .vaet
            .range((e, FIRST_ATTR, MIN_ID)..=(e, LAST_ATTR, MAX_ID))
            .map(|((_, attr, source), _)| (*attr, *source))
            .collect();
        for (attr, source) in incoming {
            let v = Value::Ref(e);
            if self.remove(source, attr, &v) {
                report.datoms.push(Datom {
                    e: source,
                    a: attr,
                    v,
                    added: false,
                });
            }
        }

        let own: Vec<(Attr, Value)> = self
            .eav
            .get(&e)
            .map(|attrs| {
                attrs
                    .iter()
                    .flat_map(|(a, vs)| vs.iter().map(move |v| (*a, v.clone())))
                    .collect()
            })
            .unwrap_or_default();
        for (attr, v) in own {
            if self.remove(e, attr, &v) {
                report.datoms.push(Datom {
                    e,
                    a: attr,
                    v,
                    added: false,
                });
            }
        }
    }

    /// Replay already-resolved datoms from a durable log.
    pub(crate) fn replay(&mut self, datoms: &[Datom], basis: u64) {
        for d in datoms {
            if d.added {
                self.add(d.e, d.a, d.v.clone());
            } else {
                self.remove(d.e, d.a, &d.v);
            }
            self.next_id = self.next_id.max(d.e.value());
        }
        self.basis = self.basis.max(basis);
        self.compact();
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// An immutable point-in-time view of the store.
///
/// Cloning is cheap. Reads never block on concurrent writers.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    index: Arc<Index>,
}

impl Snapshot {
    pub(crate) fn from_index(index: Arc<Index>) -> Self {
        Self { index }
    }

    pub(crate) fn index(&self) -> &Arc<Index> {
        &self.index
    }

    /// Number of transactions applied to produce this snapshot.
    pub fn basis(&self) -> u64 {
        self.index.basis
    }

    /// Whether the entity currently has any facts.
    pub fn contains(&self, e: EntityId) -> bool {
        self.index.eav.contains_key(&e)
    }

    /// Look up the holder of a unique attribute value.
    pub fn lookup(&self, attr: Attr, value: &Value) -> Option<EntityId> {
        self.index.resolve(&EntityRef::Lookup(attr, value.clone()))
    }

    /// Resolve an entity reference against this snapshot.
    pub fn resolve(&self, r: &EntityRef) -> Option<EntityId> {
        self.index.resolve(r)
    }

    /// First value of an attribute.
    pub fn get(&self, e: EntityId, attr: Attr) -> Option<&Value> {
        self.get_many(e, attr).first()
    }

    /// All values of an attribute.
    pub fn get_many(&self, e: EntityId, attr: Attr) -> &[Value] {
        self.index
            .eav
            .get(&e)
            .and_then(|attrs| attrs.get(&attr))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every attribute of an entity.
    pub fn attrs(&self, e: EntityId) -> Option<&BTreeMap<Attr, Vec<Value>>> {
        self.index.eav.get(&e)
    }

    /// Entities whose `attr` references `target`, sorted by id.
    pub fn referrers(&self, target: EntityId, attr: Attr) -> Vec<EntityId> {
        self.index
            .vaet
            .range((target, attr, MIN_ID)..=(target, attr, MAX_ID))
            .map(|((_, _, source), _)| *source)
            .collect()
    }

    /// Entities holding at least one value for `attr`, sorted by id.
    pub fn entities_with(&self, attr: Attr) -> Vec<EntityId> {
        self.index
            .aevt
            .range((attr, MIN_ID)..=(attr, MAX_ID))
            .map(|((_, e), _)| *e)
            .collect()
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.index.eav.iter().count()
    }

    /// Number of live datoms.
    pub fn datom_count(&self) -> usize {
        self.index
            .eav
            .iter()
            .map(|(_, attrs)| attrs.values().map(Vec::len).sum::<usize>())
            .sum()
    }
}

// ============================================================================
// Tests
// ============================================================================
