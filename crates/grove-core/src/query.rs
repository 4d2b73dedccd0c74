//! Read-only queries over a snapshot.
//!
//! Queries are a closed set of symbolic expressions so they can travel over
//! the wire unchanged and be answered by whichever backend holds the data.

use std::collections::BTreeMap;

use grove_db::{Attr, Snapshot, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical::canonicalize;
use crate::errors::GroveResult;
use crate::model::{Block, Page};
use crate::outliner::read;

/// Default cap on content search results.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// A query expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "kebab-case")]
pub enum Query {
    /// Page by title or canonical name.
    PageByName { name: String },

    /// Every page, sorted by canonical name.
    AllPages,

    /// Blocks whose references include the given block or page.
    BlocksReferencing { id: Uuid },

    /// Case-insensitive substring search over block content.
    SearchContent {
        needle: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },

    /// Raw attributes of one entity.
    Entity { id: Uuid },
}

/// Answer to a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum QueryResult {
    Page(Option<Page>),
    Pages(Vec<Page>),
    Blocks(Vec<Block>),
    /// Attribute ident -> values.
    Entity(Option<BTreeMap<String, Vec<Value>>>),
}

impl QueryResult {
    /// Number of items returned.
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Page(p) => usize::from(p.is_some()),
            QueryResult::Pages(pages) => pages.len(),
            QueryResult::Blocks(blocks) => blocks.len(),
            QueryResult::Entity(e) => usize::from(e.is_some()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn blocks_sorted(mut blocks: Vec<Block>) -> Vec<Block> {
    blocks.sort_by(|a, b| (a.page, &a.order, a.id).cmp(&(b.page, &b.order, b.id)));
    blocks
}

/// Execute a query against a snapshot.
pub fn execute(snap: &Snapshot, query: &Query) -> GroveResult<QueryResult> {
    let result = match query {
        Query::PageByName { name } => QueryResult::Page(
            read::page_by_name(snap, &canonicalize(name)).and_then(|e| read::read_page(snap, e)),
        ),

        Query::AllPages => QueryResult::Pages(read::all_pages(snap)),

        Query::BlocksReferencing { id } => {
            let blocks = match read::entity_of(snap, *id) {
                Some(target) => snap
                    .referrers(target, Attr::BlockRefs)
                    .into_iter()
                    .filter_map(|e| read::read_block(snap, e))
                    .collect(),
                None => Vec::new(),
            };
            QueryResult::Blocks(blocks_sorted(blocks))
        }

        Query::SearchContent { needle, limit } => {
            let needle = needle.to_lowercase();
            let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
            let mut blocks: Vec<Block> = snap
                .entities_with(Attr::BlockContent)
                .into_iter()
                .filter(|e| !read::is_page(snap, *e))
                .filter(|e| read::content_of(snap, *e).to_lowercase().contains(&needle))
                .filter_map(|e| read::read_block(snap, e))
                .collect();
            blocks = blocks_sorted(blocks);
            blocks.truncate(limit);
            QueryResult::Blocks(blocks)
        }

        Query::Entity { id } => QueryResult::Entity(
            read::entity_of(snap, *id)
                .and_then(|e| snap.attrs(e))
                .map(|attrs| {
                    attrs
                        .iter()
                        .map(|(attr, values)| (attr.ident().to_string(), values.clone()))
                        .collect()
                }),
        ),
    };
    tracing::debug!("query {:?}: {} results", query, result.len());
    Ok(result)
}
