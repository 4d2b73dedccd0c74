//! Identity and name conflict detection for batch ingestion.
//!
//! A batch of parsed files is checked against itself and against one
//! snapshot of the store before anything is committed. Collisions are
//! reported, never repaired: the detector does not mint replacement ids.
//!
//! Two cases are not conflicts:
//!
//! - An identity already in the store that belongs to the file being
//!   reloaded.
//! - A placeholder entity, created only because something referenced the id
//!   before any file defined it.

use std::collections::BTreeMap;

use grove_db::{Attr, EntityId, Snapshot};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical::{canonicalize, CanonicalName};
use crate::outliner::read;
use crate::parser::ParsedFile;

// ============================================================================
// Records
// ============================================================================

/// What collided.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum ConflictIdentity {
    Uuid(Uuid),
    Name(CanonicalName),
}

impl std::fmt::Display for ConflictIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictIdentity::Uuid(id) => write!(f, "id {}", id),
            ConflictIdentity::Name(name) => write!(f, "page '{}'", name),
        }
    }
}

/// Where a colliding identity came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum ConflictSource {
    /// A file in the batch.
    File { path: String },
    /// Data already in the store, with the file it came from if known.
    Database {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },
}

impl std::fmt::Display for ConflictSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictSource::File { path } => write!(f, "file {}", path),
            ConflictSource::Database { file: Some(path) } => write!(f, "database (from {})", path),
            ConflictSource::Database { file: None } => write!(f, "database"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// Two files in the batch claim the identity.
    CrossFile,
    /// A file claims an identity already held in the store.
    DbCollision,
}

/// One collision, with every source that claims it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub identity: ConflictIdentity,
    pub sources: Vec<ConflictSource>,
    pub kind: ConflictKind,
}

impl std::fmt::Display for ConflictRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sources: Vec<String> = self.sources.iter().map(ToString::to_string).collect();
        write!(f, "{} claimed by {}", self.identity, sources.join(", "))
    }
}

/// Outcome of a detector: `ok` with no conflicts, or every conflict found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictRecord>,
}

impl ConflictReport {
    pub fn from_conflicts(conflicts: Vec<ConflictRecord>) -> Self {
        Self {
            ok: conflicts.is_empty(),
            conflicts,
        }
    }

    /// Merge two reports.
    pub fn merge(mut self, other: ConflictReport) -> Self {
        self.conflicts.extend(other.conflicts);
        self.ok = self.conflicts.is_empty();
        self
    }
}

// ============================================================================
// Detection
// ============================================================================

/// Entity created only to satisfy a forward reference.
fn is_placeholder(snap: &Snapshot, e: EntityId) -> bool {
    snap.get(e, Attr::BlockType).is_none()
}

/// File that owns an existing entity through its page.
fn owning_file(snap: &Snapshot, e: EntityId) -> Option<String> {
    read::page_of(snap, e).and_then(|page| read::file_of_page(snap, page))
}

/// Group `(key, path)` claims by key, keeping first-seen path order.
fn group_claims<K: Ord>(claims: impl Iterator<Item = (K, String)>) -> BTreeMap<K, Vec<String>> {
    let mut grouped: BTreeMap<K, Vec<String>> = BTreeMap::new();
    for (key, path) in claims {
        let paths = grouped.entry(key).or_default();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    grouped
}

fn conflict_for(
    identity: ConflictIdentity,
    paths: Vec<String>,
    existing: Option<Option<String>>,
) -> Option<ConflictRecord> {
    let mut sources: Vec<ConflictSource> = paths
        .iter()
        .map(|p| ConflictSource::File { path: p.clone() })
        .collect();
    if paths.len() > 1 {
        if let Some(file) = existing {
            sources.push(ConflictSource::Database { file });
        }
        return Some(ConflictRecord {
            identity,
            sources,
            kind: ConflictKind::CrossFile,
        });
    }
    match existing {
        Some(owner) if owner.as_deref() != paths.first().map(String::as_str) => {
            sources.push(ConflictSource::Database { file: owner });
            Some(ConflictRecord {
                identity,
                sources,
                kind: ConflictKind::DbCollision,
            })
        }
        _ => None,
    }
}

/// Find block and page ids claimed by more than one source.
pub fn detect_identity_conflicts(snap: &Snapshot, files: &[ParsedFile]) -> ConflictReport {
    let claims = files.iter().flat_map(|file| {
        file.declared_identities()
            .into_iter()
            .map(move |id| (id, file.path.clone()))
    });

    let conflicts: Vec<ConflictRecord> = group_claims(claims)
        .into_iter()
        .filter_map(|(id, paths)| {
            let existing = read::entity_of(snap, id)
                .filter(|e| !is_placeholder(snap, *e))
                .map(|e| owning_file(snap, e));
            conflict_for(ConflictIdentity::Uuid(id), paths, existing)
        })
        .collect();
    ConflictReport::from_conflicts(conflicts)
}

/// Find canonical page names claimed as primary by more than one source.
///
/// Pages only referenced by a file never conflict. An existing page that no
/// file owns (created in-app, or a stub) may be claimed by a file.
pub fn detect_name_conflicts<F>(snap: &Snapshot, files: &[ParsedFile], canonicalize: F) -> ConflictReport
where
    F: Fn(&str) -> CanonicalName,
{
    let claims = files.iter().filter_map(|file| {
        file.page
            .as_ref()
            .map(|page| (canonicalize(&page.title), file.path.clone()))
    });

    let conflicts: Vec<ConflictRecord> = group_claims(claims)
        .into_iter()
        .filter_map(|(name, paths)| {
            let existing = read::page_by_name(snap, &name)
                .and_then(|page| read::file_of_page(snap, page))
                .map(Some);
            conflict_for(ConflictIdentity::Name(name), paths, existing)
        })
        .collect();
    ConflictReport::from_conflicts(conflicts)
}

/// Run every detector; the single gate before a batch commits.
pub fn validate_batch(snap: &Snapshot, files: &[ParsedFile]) -> ConflictReport {
    let report = detect_identity_conflicts(snap, files)
        .merge(detect_name_conflicts(snap, files, canonicalize));
    if !report.ok {
        tracing::debug!(
            "Batch of {} files rejected with {} conflicts",
            files.len(),
            report.conflicts.len()
        );
    }
    report
}
