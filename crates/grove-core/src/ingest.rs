//! Parallel ingestion: parse many files, validate them as one batch, commit
//! in bounded chunks.
//!
//! The pipeline runs in two steps so a caller can inspect the plan before
//! anything is written:
//!
//! - [`plan_load`] parses every file in isolation and runs the conflict
//!   detectors against one snapshot.
//! - [`execute_load_plan`] commits the plan chunk by chunk.
//!
//! [`load_graph`] runs both.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use grove_db::Snapshot;
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::{commit_batches, create_batches, ChunkFailure};
use crate::config::{IngestConfig, DEFAULT_BATCH_SIZE};
use crate::conflicts::{validate_batch, ConflictRecord};
use crate::engine::GroveEngine;
use crate::errors::{GroveError, GroveResult};
use crate::parser::{ParseOptions, ParsedFile, Parser};

/// File extensions picked up by [`collect_sources`].
pub const SOURCE_EXTENSIONS: &[&str] = &["md", "markdown"];

// ============================================================================
// Records
// ============================================================================

/// Raw text of one file, with its graph-relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Ok,
    Error,
}

/// Per-file parse result carried through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileParseOutcome {
    pub status: Status,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Ingestion knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub parallel: bool,
    pub parse: ParseOptions,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            parallel: true,
            parse: ParseOptions::default(),
        }
    }
}

impl LoadOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            parallel: config.parallel_parse,
            parse: ParseOptions::default(),
        }
    }
}

/// A validated batch, ready to commit unless its status is `Error`.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub status: Status,
    pub files: Vec<ParsedFile>,
    pub outcomes: Vec<FileParseOutcome>,
    pub conflicts: Vec<ConflictRecord>,
    pub batch_size: usize,
}

impl LoadPlan {
    pub fn parse_errors(&self) -> impl Iterator<Item = &FileParseOutcome> {
        self.outcomes.iter().filter(|o| o.status == Status::Error)
    }
}

/// Aggregated outcome of an ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub status: Status,
    /// Files that parsed and were scheduled for commit.
    pub total: usize,
    pub committed: usize,
    pub chunks: usize,
    pub chunks_committed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ChunkFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parse_errors: Vec<FileParseOutcome>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub affected_pages: BTreeSet<Uuid>,
}

// ============================================================================
// Pipeline
// ============================================================================

fn parse_one(parser: &dyn Parser, source: &SourceFile, opts: &ParseOptions) -> (Option<ParsedFile>, FileParseOutcome) {
    match parser.parse(&source.path, &source.content, opts) {
        Ok(parsed) => (
            Some(parsed),
            FileParseOutcome {
                status: Status::Ok,
                file_path: source.path.clone(),
                detail: None,
            },
        ),
        Err(err) => {
            tracing::debug!("Parse failed for {}: {}", source.path, err);
            (
                None,
                FileParseOutcome {
                    status: Status::Error,
                    file_path: source.path.clone(),
                    detail: Some(err.to_string()),
                },
            )
        }
    }
}

/// Parse every source independently; a failing file never affects the others.
///
/// Results keep the order of `sources`.
pub fn parse_files(
    parser: &dyn Parser,
    sources: &[SourceFile],
    opts: &LoadOptions,
) -> (Vec<ParsedFile>, Vec<FileParseOutcome>) {
    let results: Vec<(Option<ParsedFile>, FileParseOutcome)> = if opts.parallel {
        sources
            .par_iter()
            .map(|source| parse_one(parser, source, &opts.parse))
            .collect()
    } else {
        sources
            .iter()
            .map(|source| parse_one(parser, source, &opts.parse))
            .collect()
    };

    let mut parsed = Vec::with_capacity(results.len());
    let mut outcomes = Vec::with_capacity(results.len());
    for (file, outcome) in results {
        parsed.extend(file);
        outcomes.push(outcome);
    }
    (parsed, outcomes)
}

/// Parse and validate a batch against one snapshot.
///
/// Conflicts mark the whole plan as `Error`; parse failures only exclude the
/// failing files.
pub fn plan_load(
    snap: &Snapshot,
    parser: &dyn Parser,
    sources: &[SourceFile],
    opts: &LoadOptions,
) -> LoadPlan {
    let (files, outcomes) = parse_files(parser, sources, opts);
    let report = validate_batch(snap, &files);
    let status = if report.ok { Status::Ok } else { Status::Error };
    tracing::debug!(
        "Planned load of {} files ({} parsed, {} conflicts)",
        sources.len(),
        files.len(),
        report.conflicts.len()
    );
    LoadPlan {
        status,
        files,
        outcomes,
        conflicts: report.conflicts,
        batch_size: opts.batch_size,
    }
}

/// Commit a plan in chunks of `plan.batch_size`.
///
/// A plan whose status is `Error` commits nothing. `on_chunk` receives the
/// running count of committed files.
///
/// # Errors
///
/// Returns [`GroveError::InvalidConfiguration`] for a zero batch size.
/// Commit failures are reported in [`LoadReport::failure`].
pub fn execute_load_plan<F>(engine: &GroveEngine, plan: LoadPlan, on_chunk: F) -> GroveResult<LoadReport>
where
    F: FnMut(usize),
{
    let parse_errors: Vec<FileParseOutcome> = plan.parse_errors().cloned().collect();
    let total = plan.files.len();

    if plan.status == Status::Error {
        tracing::info!(
            "Load rejected: {} conflicts, nothing committed",
            plan.conflicts.len()
        );
        return Ok(LoadReport {
            status: Status::Error,
            total,
            committed: 0,
            chunks: 0,
            chunks_committed: 0,
            failure: None,
            conflicts: plan.conflicts,
            parse_errors,
            affected_pages: BTreeSet::new(),
        });
    }

    let chunks = create_batches(plan.files, plan.batch_size)?;
    let summary = commit_batches(engine, chunks, on_chunk);
    let status = if summary.failure.is_some() {
        Status::Error
    } else {
        Status::Ok
    };
    tracing::info!(
        "Loaded {}/{} files in {}/{} chunks",
        summary.committed,
        total,
        summary.chunks_committed,
        summary.chunks
    );
    Ok(LoadReport {
        status,
        total,
        committed: summary.committed,
        chunks: summary.chunks,
        chunks_committed: summary.chunks_committed,
        failure: summary.failure,
        conflicts: Vec::new(),
        parse_errors,
        affected_pages: summary.affected_pages,
    })
}

/// Parse, validate and commit a set of files.
pub fn load_graph(
    engine: &GroveEngine,
    parser: &dyn Parser,
    sources: &[SourceFile],
    opts: &LoadOptions,
) -> GroveResult<LoadReport> {
    let plan = plan_load(&engine.snapshot()?, parser, sources, opts);
    execute_load_plan(engine, plan, |_| {})
}

// ============================================================================
// Source discovery
// ============================================================================

/// Read every outline file under `root`, respecting ignore files and skipping
/// hidden entries. Paths are relative to `root` with `/` separators, sorted.
///
/// Unreadable files are skipped with a warning.
pub fn collect_sources(root: &Path) -> GroveResult<Vec<SourceFile>> {
    if !root.is_dir() {
        return Err(GroveError::not_found("directory", root.display()));
    }

    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_exclude(true)
        .follow_links(false)
        .build();

    let mut sources = Vec::new();
    for result in walker {
        let entry = match result {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!("Skipping entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !SOURCE_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }

        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        match fs::read_to_string(path) {
            Ok(content) => sources.push(SourceFile::new(relative, content)),
            Err(e) => tracing::warn!("Skipping unreadable file {}: {}", path.display(), e),
        }
    }
    sources.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::OutlineParser;
    use tempfile::TempDir;

    fn opts(batch_size: usize) -> LoadOptions {
        LoadOptions {
            batch_size,
            ..LoadOptions::default()
        }
    }

    fn sources(n: usize) -> Vec<SourceFile> {
        (0..n)
            .map(|i| SourceFile::new(format!("page-{i}.md"), format!("- block {i}\n  - child [[Hub]]\n")))
            .collect()
    }

    #[test]
    fn test_five_files_in_three_chunks() {
        let engine = GroveEngine::in_memory();
        let plan = plan_load(&engine.snapshot().unwrap(), &OutlineParser, &sources(5), &opts(2));
        assert_eq!(plan.status, Status::Ok);

        let mut progress = Vec::new();
        let report = execute_load_plan(&engine, plan, |n| progress.push(n)).unwrap();
        assert_eq!(report.status, Status::Ok);
        assert_eq!(report.chunks, 3);
        assert_eq!(report.committed, 5);
        assert_eq!(progress, [2, 4, 5]);
        assert_eq!(report.affected_pages.len(), 5);

        let hub = engine.page_by_title("hub").unwrap().unwrap();
        assert!(hub.file.is_none());
        assert_eq!(
            engine
                .query(&crate::query::Query::BlocksReferencing { id: hub.id })
                .unwrap()
                .len(),
            5
        );
    }

    #[test]
    fn test_duplicate_identity_blocks_whole_load() {
        let id = Uuid::new_v4();
        let files = vec![
            SourceFile::new("a.md", format!("- one\n  id:: {id}\n")),
            SourceFile::new("b.md", format!("- two\n  id:: {id}\n")),
        ];
        let engine = GroveEngine::in_memory();
        let report = load_graph(&engine, &OutlineParser, &files, &opts(1)).unwrap();
        assert_eq!(report.status, Status::Error);
        assert_eq!(report.committed, 0);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(engine.snapshot().unwrap().datom_count(), 0);
    }

    #[test]
    fn test_error_plan_commits_nothing() {
        let engine = GroveEngine::in_memory();
        let mut plan = plan_load(&engine.snapshot().unwrap(), &OutlineParser, &sources(3), &opts(10));
        plan.status = Status::Error;
        let report = execute_load_plan(&engine, plan, |_| {}).unwrap();
        assert_eq!(report.status, Status::Error);
        assert_eq!(report.committed, 0);
        assert!(engine.page_by_title("page-0").unwrap().is_none());
    }

    #[test]
    fn test_parse_errors_are_isolated() {
        let files = vec![
            SourceFile::new("good.md", "- fine\n"),
            SourceFile::new("bad.md", "- top\n      - too deep\n"),
            SourceFile::new("also-good.md", "- fine too\n"),
        ];
        let engine = GroveEngine::in_memory();
        let report = load_graph(&engine, &OutlineParser, &files, &opts(10)).unwrap();
        assert_eq!(report.status, Status::Ok);
        assert_eq!(report.committed, 2);
        assert_eq!(report.parse_errors.len(), 1);
        assert_eq!(report.parse_errors[0].file_path, "bad.md");
        assert!(report.parse_errors[0].detail.as_deref().unwrap().contains("line 2"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["parseErrors"][0]["status"], "error");
    }

    #[test]
    fn test_reload_is_not_a_conflict() {
        let id = Uuid::new_v4();
        let engine = GroveEngine::in_memory();
        let first = vec![SourceFile::new("Journal.md", format!("- entry\n  id:: {id}\n"))];
        assert_eq!(
            load_graph(&engine, &OutlineParser, &first, &opts(10)).unwrap().status,
            Status::Ok
        );

        let second = vec![SourceFile::new("Journal.md", format!("- entry, revised\n  id:: {id}\n"))];
        let report = load_graph(&engine, &OutlineParser, &second, &opts(10)).unwrap();
        assert_eq!(report.status, Status::Ok);
        assert_eq!(engine.block(id).unwrap().unwrap().content, "entry, revised");

        let moved = vec![SourceFile::new("Other.md", format!("- stolen\n  id:: {id}\n"))];
        let report = load_graph(&engine, &OutlineParser, &moved, &opts(10)).unwrap();
        assert_eq!(report.status, Status::Error);
    }

    #[test]
    fn test_sequential_parse_matches_parallel() {
        let engine = GroveEngine::in_memory();
        let snap = engine.snapshot().unwrap();
        let parallel = plan_load(&snap, &OutlineParser, &sources(4), &opts(2));
        let sequential = plan_load(
            &snap,
            &OutlineParser,
            &sources(4),
            &LoadOptions {
                parallel: false,
                ..opts(2)
            },
        );
        let paths = |plan: &LoadPlan| plan.files.iter().map(|f| f.path.clone()).collect::<Vec<_>>();
        assert_eq!(paths(&parallel), paths(&sequential));
    }

    #[test]
    fn test_collect_sources() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("journals")).unwrap();
        fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        fs::write(dir.path().join("Index.md"), "- root\n").unwrap();
        fs::write(dir.path().join("journals/2024_01_01.md"), "- day\n").unwrap();
        fs::write(dir.path().join(".hidden/secret.md"), "- no\n").unwrap();
        fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();

        let found = collect_sources(dir.path()).unwrap();
        let paths: Vec<&str> = found.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, ["Index.md", "journals/2024_01_01.md"]);
        assert_eq!(found[0].content, "- root\n");

        assert!(collect_sources(&dir.path().join("missing")).is_err());
    }
}
