//! Batch transaction building and chunked commits for file ingestion.
//!
//! [`build_batch_tx`] turns a validated batch of parsed files into a single
//! transaction. Identities are declared before any fact refers to them, so
//! the emission order is fixed:
//!
//! 1. File identities
//! 2. Pages referenced across files
//! 3. Primary page identities
//! 4. Deletes of stale blocks from reloaded files
//! 5. Page facts
//! 6. Block identities (declared blocks and every referenced id)
//! 7. Block facts
//! 8. File contents

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use grove_db::{Attr, EntityRef, Snapshot, Transaction, TxOp, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical::CanonicalName;
use crate::engine::GroveEngine;
use crate::errors::{ErrorKind, GroveError, GroveResult};
use crate::model::Properties;
use crate::order_key::keys_between;
use crate::outliner::read::{self, BLOCK_TYPE, PAGE_TYPE};
use crate::parser::ParsedFile;

// ============================================================================
// Page plan
// ============================================================================

/// One page the batch touches, merged across files by canonical name.
struct PagePlan<'a> {
    name: &'a CanonicalName,
    title: &'a str,
    uuid: Option<Uuid>,
    properties: Option<&'a Properties>,
    /// Path of the file this page is the primary source of.
    primary_file: Option<&'a str>,
}

/// Deduplicate pages by canonical name; the first occurrence supplies the
/// title and identity. Primary declarations are recorded on the merged entry.
fn plan_pages(files: &[ParsedFile]) -> Vec<PagePlan<'_>> {
    let mut plans: Vec<PagePlan<'_>> = Vec::new();
    let mut index: HashMap<&CanonicalName, usize> = HashMap::new();

    for file in files {
        let primary = file.page.iter().map(|p| (p, true));
        let stubs = file.pages.iter().map(|p| (p, false));
        for (page, is_primary) in primary.chain(stubs) {
            let slot = *index.entry(&page.name).or_insert_with(|| {
                plans.push(PagePlan {
                    name: &page.name,
                    title: &page.title,
                    uuid: page.uuid,
                    properties: None,
                    primary_file: None,
                });
                plans.len() - 1
            });
            if is_primary && plans[slot].primary_file.is_none() {
                let plan = &mut plans[slot];
                plan.primary_file = Some(&file.path);
                plan.properties = Some(&page.properties);
                plan.uuid = plan.uuid.or(page.uuid);
            }
        }
    }
    plans
}

fn emit_page_identity(snap: &Snapshot, tx: &mut Transaction, plan: &PagePlan<'_>) {
    let page = EntityRef::page_name(plan.name.as_str());
    if let Some(existing) = read::page_by_name(snap, plan.name) {
        // An explicit id on a page first seen as a stub claims the stub.
        if let Some(id) = plan.uuid {
            if read::uuid_of(snap, existing) != Some(id) && read::entity_of(snap, id).is_none() {
                tx.push(TxOp::assert(existing, Attr::BlockUuid, id));
            }
        }
        return;
    }
    match plan.uuid {
        Some(id) => {
            tx.push(TxOp::ensure(Attr::BlockUuid, id));
            tx.push(TxOp::assert(EntityRef::block(id), Attr::PageName, plan.name.as_str()));
        }
        None => {
            tx.push(TxOp::ensure(Attr::PageName, plan.name.as_str()));
            tx.push(TxOp::assert(page, Attr::BlockUuid, Uuid::new_v4()));
        }
    }
}

fn emit_page_facts(
    snap: &Snapshot,
    tx: &mut Transaction,
    plan: &PagePlan<'_>,
    now: DateTime<Utc>,
) {
    let page = EntityRef::page_name(plan.name.as_str());
    let is_new = read::page_by_name(snap, plan.name).is_none();
    if !is_new && plan.primary_file.is_none() {
        return;
    }

    tx.push(TxOp::assert(page.clone(), Attr::BlockType, PAGE_TYPE));
    tx.push(TxOp::assert(page.clone(), Attr::PageTitle, plan.title));
    if let Some(path) = plan.primary_file {
        tx.push(TxOp::assert(page.clone(), Attr::PageFile, EntityRef::file(path)));
        match plan.properties {
            Some(props) if !props.is_empty() => tx.push(TxOp::assert(
                page.clone(),
                Attr::BlockProperties,
                Value::Map(props.clone()),
            )),
            _ => tx.push(TxOp::retract_attr(page.clone(), Attr::BlockProperties)),
        }
    }
    if is_new {
        tx.push(TxOp::assert(page.clone(), Attr::BlockCreatedAt, now));
    }
    tx.push(TxOp::assert(page, Attr::BlockUpdatedAt, now));
}

// ============================================================================
// Transaction building
// ============================================================================

/// Delete ops for a file being reloaded.
///
/// Blocks of the file's current page are retracted unless the new parse
/// declares the same id, in which case they are updated in place and keep
/// their incoming references. A page the file no longer defines is detached
/// from the file and kept as a plain page.
pub fn retract_file_blocks(snap: &Snapshot, file: &ParsedFile) -> Vec<TxOp> {
    let Some(file_e) = snap.lookup(Attr::FilePath, &Value::from(file.path.as_str())) else {
        return Vec::new();
    };
    let keep: HashSet<Uuid> = file.declared_identities().into_iter().collect();
    let primary = file.page.as_ref().map(|p| p.name.as_str());

    let mut ops = Vec::new();
    for page in snap.referrers(file_e, Attr::PageFile) {
        for block in read::blocks_of_page(snap, page) {
            let kept = read::uuid_of(snap, block).is_some_and(|id| keep.contains(&id));
            if !kept {
                ops.push(TxOp::retract_entity(block));
            }
        }
        let name = snap.get(page, Attr::PageName).and_then(Value::as_str);
        if name != primary {
            ops.push(TxOp::retract_attr(page, Attr::PageFile));
        }
    }
    ops
}

/// Order keys for the top-level blocks of a file claiming a page that
/// already holds blocks the file does not own.
///
/// The file's blocks go after the last surviving child so sibling keys stay
/// unique. Empty when the page is new or already sourced from this file.
fn rebased_top_level(snap: &Snapshot, file: &ParsedFile) -> HashMap<Uuid, String> {
    let Some(page) = file
        .page
        .as_ref()
        .and_then(|p| read::page_by_name(snap, &p.name))
    else {
        return HashMap::new();
    };
    if read::file_of_page(snap, page).as_deref() == Some(file.path.as_str()) {
        return HashMap::new();
    }

    let declared: HashSet<Uuid> = file.declared_identities().into_iter().collect();
    let last = read::children(snap, page)
        .into_iter()
        .filter(|e| read::uuid_of(snap, *e).is_some_and(|id| !declared.contains(&id)))
        .filter_map(|e| read::order_of(snap, e))
        .max();
    let Some(last) = last else {
        return HashMap::new();
    };

    let top: Vec<Uuid> = file
        .blocks
        .iter()
        .filter(|b| b.parent.is_none())
        .map(|b| b.uuid)
        .collect();
    match keys_between(Some(last), None, top.len()) {
        Ok(keys) => top.into_iter().zip(keys).collect(),
        Err(err) => {
            tracing::warn!("Keeping parsed order for {}: {}", file.path, err);
            HashMap::new()
        }
    }
}

/// Build one transaction for a validated batch of parsed files.
///
/// `snap` must be the state the transaction will be applied to; it decides
/// which pages and blocks already exist. `delete_ops` are emitted after page
/// identities and before any page or block facts.
pub fn build_batch_tx(snap: &Snapshot, files: &[ParsedFile], delete_ops: Vec<TxOp>) -> Transaction {
    let now = Utc::now();
    let mut tx = Transaction::labeled("load-graph");

    for file in files {
        tx.push(TxOp::ensure(Attr::FilePath, file.path.as_str()));
    }

    let pages = plan_pages(files);
    let (primary, referenced): (Vec<&PagePlan<'_>>, Vec<&PagePlan<'_>>) =
        pages.iter().partition(|p| p.primary_file.is_some());
    for plan in referenced.iter().chain(primary.iter()) {
        emit_page_identity(snap, &mut tx, plan);
    }

    for op in delete_ops {
        tx.push(op);
    }

    for plan in &pages {
        emit_page_facts(snap, &mut tx, plan, now);
    }

    let mut declared: HashSet<Uuid> = HashSet::new();
    for file in files {
        let ids = file.blocks.iter().map(|b| b.uuid).chain(file.refs.iter().copied());
        for id in ids {
            if declared.insert(id) {
                tx.push(TxOp::ensure(Attr::BlockUuid, id));
            }
        }
    }

    for file in files {
        let Some(page) = &file.page else {
            continue;
        };
        let page_ref = EntityRef::page_name(page.name.as_str());
        let rebased = rebased_top_level(snap, file);
        for block in &file.blocks {
            let this = EntityRef::block(block.uuid);
            let existing = read::entity_of(snap, block.uuid)
                .filter(|e| snap.get(*e, Attr::BlockType).is_some());
            if existing.is_some() {
                tx.push(TxOp::retract_attr(this.clone(), Attr::BlockRefs));
                tx.push(TxOp::retract_attr(this.clone(), Attr::BlockProperties));
            }
            let parent = block.parent.map(EntityRef::block).unwrap_or_else(|| page_ref.clone());

            tx.push(TxOp::assert(this.clone(), Attr::BlockType, BLOCK_TYPE));
            tx.push(TxOp::assert(this.clone(), Attr::BlockContent, block.content.as_str()));
            tx.push(TxOp::assert(this.clone(), Attr::BlockParent, parent));
            tx.push(TxOp::assert(this.clone(), Attr::BlockPage, page_ref.clone()));
            let order = rebased.get(&block.uuid).unwrap_or(&block.order);
            tx.push(TxOp::assert(this.clone(), Attr::BlockOrder, order.as_str()));
            if !block.properties.is_empty() {
                tx.push(TxOp::assert(
                    this.clone(),
                    Attr::BlockProperties,
                    Value::Map(block.properties.clone()),
                ));
            }
            for name in &block.page_refs {
                tx.push(TxOp::assert(
                    this.clone(),
                    Attr::BlockRefs,
                    EntityRef::page_name(name.as_str()),
                ));
            }
            for target in &block.block_refs {
                tx.push(TxOp::assert(this.clone(), Attr::BlockRefs, EntityRef::block(*target)));
            }
            if existing.is_none() {
                tx.push(TxOp::assert(this.clone(), Attr::BlockCreatedAt, now));
            }
            tx.push(TxOp::assert(this, Attr::BlockUpdatedAt, now));
        }
    }

    for file in files {
        tx.push(TxOp::assert(
            EntityRef::file(file.path.as_str()),
            Attr::FileContent,
            file.content.as_str(),
        ));
    }

    tracing::debug!(
        "Built batch tx: {} files, {} pages, {} ops",
        files.len(),
        pages.len(),
        tx.len()
    );
    tx
}

// ============================================================================
// Chunked commit
// ============================================================================

/// Split files into chunks of at most `batch_size`.
///
/// # Errors
///
/// Returns [`GroveError::InvalidConfiguration`] when `batch_size` is zero.
pub fn create_batches(files: Vec<ParsedFile>, batch_size: usize) -> GroveResult<Vec<Vec<ParsedFile>>> {
    if batch_size == 0 {
        return Err(GroveError::InvalidConfiguration {
            message: "batch_size must be greater than 0".to_string(),
            hint: "Set ingest.batch_size to a positive number".to_string(),
        });
    }
    let mut chunks = Vec::with_capacity(files.len().div_ceil(batch_size));
    let mut files = files.into_iter().peekable();
    while files.peek().is_some() {
        chunks.push(files.by_ref().take(batch_size).collect());
    }
    Ok(chunks)
}

/// Why a chunk failed to commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFailure {
    pub index: usize,
    pub kind: ErrorKind,
    pub message: String,
}

/// Result of committing a sequence of chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    /// Files committed, summed over successful chunks.
    pub committed: usize,
    pub chunks: usize,
    pub chunks_committed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ChunkFailure>,
    /// Pages whose content the commits changed.
    pub affected_pages: BTreeSet<Uuid>,
}

/// Commit chunks one transaction at a time.
///
/// Each chunk is built against the store state it is applied to. The first
/// failing chunk stops the loop; chunks already committed stay committed.
/// `on_chunk` is called after every successful chunk with the running file
/// count.
pub fn commit_batches<F>(engine: &GroveEngine, chunks: Vec<Vec<ParsedFile>>, mut on_chunk: F) -> CommitSummary
where
    F: FnMut(usize),
{
    let mut summary = CommitSummary {
        chunks: chunks.len(),
        ..CommitSummary::default()
    };

    for (index, chunk) in chunks.iter().enumerate() {
        let built = engine.transact_with(|snap| {
            let deletes = chunk.iter().flat_map(|f| retract_file_blocks(snap, f)).collect();
            Ok(build_batch_tx(snap, chunk, deletes))
        });
        match built {
            Ok(_) => {
                summary.committed += chunk.len();
                summary.chunks_committed += 1;
                match engine.snapshot() {
                    Ok(snap) => summary.affected_pages.extend(chunk.iter().filter_map(|f| {
                        let page = read::page_by_name(&snap, &f.page.as_ref()?.name)?;
                        read::uuid_of(&snap, page)
                    })),
                    Err(err) => tracing::warn!(
                        "Chunk {} committed but its affected pages are unknown: {}",
                        index,
                        err
                    ),
                }
                tracing::debug!(
                    "Committed chunk {}/{} ({} files)",
                    index + 1,
                    summary.chunks,
                    chunk.len()
                );
                on_chunk(summary.committed);
            }
            Err(err) => {
                tracing::warn!("Chunk {} failed: {}", index, err);
                summary.failure = Some(ChunkFailure {
                    index,
                    kind: err.kind(),
                    message: err.to_string(),
                });
                break;
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outliner::tree::get_page_tree;
    use crate::parser::{OutlineParser, ParseOptions, Parser};

    fn parse(path: &str, content: &str) -> ParsedFile {
        OutlineParser
            .parse(path, content, &ParseOptions::default())
            .unwrap()
    }

    fn commit(engine: &GroveEngine, files: Vec<ParsedFile>) -> CommitSummary {
        commit_batches(engine, create_batches(files, 10).unwrap(), |_| {})
    }

    fn page_id(engine: &GroveEngine, title: &str) -> Uuid {
        engine.page_by_title(title).unwrap().unwrap().id
    }

    #[test]
    fn test_cross_file_refs_resolve_in_one_tx() {
        let target = Uuid::new_v4();
        let a = parse("Alpha.md", &format!("- see (({target}))\n- and [[Beta]]\n"));
        let b = parse("Beta.md", &format!("- target\n  id:: {target}\n"));
        let engine = GroveEngine::in_memory();
        let summary = commit(&engine, vec![a, b]);
        assert!(summary.failure.is_none());
        assert_eq!(summary.committed, 2);

        let beta = page_id(&engine, "beta");
        let block = engine.block(target).unwrap().unwrap();
        assert_eq!(block.page, Some(beta));
        assert_eq!(block.content, "target");

        let snap = engine.snapshot().unwrap();
        let alpha = get_page_tree(&snap, page_id(&engine, "alpha")).unwrap().unwrap();
        let first = engine.block(alpha.children[0].id).unwrap().unwrap();
        assert!(first.refs.contains(&target));
        let second = engine.block(alpha.children[1].id).unwrap().unwrap();
        assert!(second.refs.contains(&beta));
        assert_eq!(engine.page_by_title("Beta").unwrap().unwrap().file.as_deref(), Some("Beta.md"));
    }

    #[test]
    fn test_pages_deduplicated_first_occurrence_wins() {
        let a = parse("One.md", "- [[Shared Topic]]\n");
        let b = parse("Two.md", "- [[shared topic]]\n");
        let snap = Snapshot::default();
        let tx = build_batch_tx(&snap, &[a, b], Vec::new());
        let ensures = tx
            .ops
            .iter()
            .filter(|op| matches!(op, TxOp::Ensure { attr: Attr::PageName, value } if value.as_str() == Some("shared topic")))
            .count();
        assert_eq!(ensures, 1);

        let engine = GroveEngine::in_memory();
        engine.transact(&tx).unwrap();
        assert_eq!(engine.page_by_title("shared topic").unwrap().unwrap().title, "Shared Topic");
    }

    #[test]
    fn test_identities_precede_facts() {
        let a = parse("Order.md", "- parent\n  - child [[Elsewhere]]\n");
        let tx = build_batch_tx(&Snapshot::default(), &[a], Vec::new());
        let first_fact = tx
            .ops
            .iter()
            .position(|op| matches!(op, TxOp::Assert { attr: Attr::BlockContent, .. }))
            .unwrap();
        let last_block_ensure = tx
            .ops
            .iter()
            .rposition(|op| matches!(op, TxOp::Ensure { attr: Attr::BlockUuid, .. }))
            .unwrap();
        assert!(last_block_ensure < first_fact);
        assert!(matches!(tx.ops[0], TxOp::Ensure { attr: Attr::FilePath, .. }));
        assert!(matches!(
            tx.ops.last(),
            Some(TxOp::Assert { attr: Attr::FileContent, .. })
        ));
    }

    #[test]
    fn test_reload_replaces_stale_blocks() {
        let keep = Uuid::new_v4();
        let engine = GroveEngine::in_memory();
        commit(
            &engine,
            vec![parse("Notes.md", &format!("- keep\n  id:: {keep}\n- stale\n"))],
        );
        let notes = page_id(&engine, "notes");

        let summary = commit(
            &engine,
            vec![parse("Notes.md", &format!("- kept, edited\n  id:: {keep}\n- fresh\n"))],
        );
        assert!(summary.failure.is_none());
        assert_eq!(page_id(&engine, "notes"), notes);

        let tree = engine.get_page_tree(notes).unwrap().unwrap();
        let contents: Vec<&str> = tree.children.iter().map(|n| n.content.as_str()).collect();
        assert_eq!(contents, ["kept, edited", "fresh"]);
        assert_eq!(tree.children[0].id, keep);
        assert!(engine.query(&crate::query::Query::SearchContent {
            needle: "stale".into(),
            limit: None,
        })
        .unwrap()
        .is_empty());
    }

    #[test]
    fn test_stub_then_primary_across_chunks() {
        let explicit = Uuid::new_v4();
        let files = vec![
            parse("Early.md", "- mentions [[Later]]\n"),
            parse("Later.md", &format!("id:: {explicit}\n\n- body\n")),
        ];
        let engine = GroveEngine::in_memory();
        let summary = commit_batches(&engine, create_batches(files, 1).unwrap(), |_| {});
        assert_eq!(summary.chunks, 2);
        assert_eq!(summary.chunks_committed, 2);
        let later = engine.page_by_title("later").unwrap().unwrap();
        assert_eq!(later.id, explicit);
        assert_eq!(later.file.as_deref(), Some("Later.md"));
    }

    #[test]
    fn test_file_claiming_in_app_page_appends_after_its_blocks() {
        let engine = GroveEngine::in_memory();
        let topic = match engine.create_page("Topic", None).unwrap().result {
            crate::OpResult::PageCreated { id, .. } => id,
            other => panic!("unexpected {other:?}"),
        };
        engine
            .insert_blocks(vec![crate::NewBlock::new("in-app")], topic, false)
            .unwrap();

        let summary = commit(&engine, vec![parse("Topic.md", "- from file\n- second\n")]);
        assert!(summary.failure.is_none());

        let snap = engine.snapshot().unwrap();
        let page = read::entity_of(&snap, topic).unwrap();
        let kids = read::children(&snap, page);
        let contents: Vec<&str> = kids.iter().map(|e| read::content_of(&snap, *e)).collect();
        assert_eq!(contents, ["in-app", "from file", "second"]);
        let orders: HashSet<&str> = kids.iter().filter_map(|e| read::order_of(&snap, *e)).collect();
        assert_eq!(orders.len(), 3);
        assert_eq!(engine.page_by_title("Topic").unwrap().unwrap().file.as_deref(), Some("Topic.md"));
    }

    /// Serves reads only until the first commit lands.
    struct ReadsFailAfterCommit(grove_db::MemoryStore);

    impl grove_db::DatomStore for ReadsFailAfterCommit {
        fn snapshot(&self) -> grove_db::DbResult<Snapshot> {
            let snap = self.0.snapshot()?;
            if snap.basis() > 0 {
                return Err(grove_db::DbError::internal("view unavailable"));
            }
            Ok(snap)
        }

        fn transact(&self, tx: &Transaction) -> grove_db::DbResult<grove_db::TxReport> {
            self.0.transact(tx)
        }

        fn flush(&self) -> grove_db::DbResult<()> {
            Ok(())
        }

        fn evict(&self) -> grove_db::DbResult<()> {
            Ok(())
        }

        fn is_materialized(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_unreadable_store_after_commit_keeps_count() {
        let store = std::sync::Arc::new(ReadsFailAfterCommit(grove_db::MemoryStore::new()));
        let engine = GroveEngine::with_store(store, crate::config::GroveConfig::default());
        let summary = commit(&engine, vec![parse("Solo.md", "- only\n")]);
        assert_eq!(summary.committed, 1);
        assert_eq!(summary.chunks_committed, 1);
        assert!(summary.failure.is_none());
        assert!(summary.affected_pages.is_empty());
    }

    #[test]
    fn test_create_batches() {
        let files: Vec<ParsedFile> = (0..5)
            .map(|i| ParsedFile::empty(format!("{i}.md"), ""))
            .collect();
        let chunks = create_batches(files, 2).unwrap();
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, [2, 2, 1]);
        assert!(create_batches(Vec::new(), 3).unwrap().is_empty());
        assert!(matches!(
            create_batches(Vec::new(), 0),
            Err(GroveError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_failing_chunk_stops_loop() {
        let dir = tempfile::TempDir::new().unwrap();
        let graph = dir.path().join("graph");
        let config = crate::config::GroveConfig {
            store: grove_db::StoreConfig::file(&graph),
            ..Default::default()
        };
        let engine = GroveEngine::open(config).unwrap();
        let files = vec![
            parse("Good.md", "- fine\n"),
            parse("Bad.md", "- boom\n"),
            parse("Tail.md", "- never\n"),
        ];
        // Losing the log directory makes every later append fail.
        let summary = commit_batches(&engine, create_batches(files, 1).unwrap(), |_| {
            let _ = std::fs::remove_dir_all(&graph);
        });
        assert_eq!(summary.committed, 1);
        assert_eq!(summary.chunks_committed, 1);
        let failure = summary.failure.unwrap();
        assert_eq!(failure.index, 1);
        assert_eq!(failure.kind, ErrorKind::Internal);
        assert!(engine.page_by_title("good").unwrap().is_some());
        assert!(engine.page_by_title("bad").unwrap().is_none());
    }
}
