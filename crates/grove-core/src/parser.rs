//! Parser contract and the reference outline parser.
//!
//! A [`Parser`] turns one file's text into page and block records. Parsing
//! is pure and per-file, so the ingestion pipeline can run parsers in
//! parallel and isolate failures to the file that caused them.
//!
//! ## Outline Format
//!
//! [`OutlineParser`] reads the same format the exporter writes:
//!
//! ```text
//! title:: Project Grove
//! tags:: notes
//! - first block
//!   id:: 6a3c1a1e-8d0b-4d8e-9d55-2f1b7f0e5c11
//!   - child linking [[Other Page]]
//! - second block with ((6a3c1a1e-8d0b-4d8e-9d55-2f1b7f0e5c11))
//! ```
//!
//! - Leading `key:: value` lines before the first bullet are page properties.
//!   `title::` overrides the title derived from the file name and `id::`
//!   fixes the page identity.
//! - Each `- ` line starts a block; depth is the indentation divided by two.
//! - `key:: value` lines under a block are its properties; `id::` fixes the
//!   block identity. Other lines continue the block's content.
//! - A continuation line starting with `\` has it removed. The exporter adds
//!   one to content lines that would otherwise read as a bullet or property.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::canonical::{canonicalize, CanonicalName};
use crate::model::Properties;
use crate::order_key::keys_between;

// ============================================================================
// Contract
// ============================================================================

/// A file that could not be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Parse error in {path}{}: {message}", line_suffix(.line))]
pub struct ParseError {
    /// Path of the offending file.
    pub path: String,
    /// 1-based line number, when the error is tied to a line.
    pub line: Option<usize>,
    pub message: String,
}

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|l| format!(" at line {}", l)).unwrap_or_default()
}

impl ParseError {
    pub fn new(path: impl Into<String>, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

/// Parser knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseOptions {
    /// Reject indentation that is odd or skips a level. When off, such lines
    /// are clamped to the nearest valid depth.
    pub strict_indent: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            strict_indent: true,
        }
    }
}

/// A page found in a file: the primary page or a referenced stub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedPage {
    /// Explicit identity from an `id::` property.
    pub uuid: Option<Uuid>,
    pub title: String,
    pub name: CanonicalName,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

impl ParsedPage {
    pub fn stub(title: &str) -> Self {
        Self {
            uuid: None,
            title: title.trim().to_string(),
            name: canonicalize(title),
            properties: Properties::new(),
        }
    }
}

/// A block found in a file, already placed in the file's tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedBlock {
    pub uuid: Uuid,
    pub content: String,
    /// Parent block, or `None` for top-level blocks of the page.
    pub parent: Option<Uuid>,
    pub order: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    /// Canonical names of pages linked with `[[...]]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub page_refs: Vec<CanonicalName>,
    /// Blocks referenced with `((uuid))`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_refs: Vec<Uuid>,
    /// Whether the identity came from an `id::` property.
    pub explicit_id: bool,
    /// 1-based line of the bullet.
    pub line: usize,
}

/// Everything one file contributes to the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFile {
    pub path: String,
    pub content: String,
    /// The page this file is the primary source of.
    pub page: Option<ParsedPage>,
    /// Pages merely referenced by this file.
    pub pages: Vec<ParsedPage>,
    /// Blocks in document order.
    pub blocks: Vec<ParsedBlock>,
    /// Every block identity referenced from this file.
    pub refs: Vec<Uuid>,
}

impl ParsedFile {
    /// A file that contributes only its content.
    pub fn empty(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            page: None,
            pages: Vec::new(),
            blocks: Vec::new(),
            refs: Vec::new(),
        }
    }

    /// Every identity this file declares: the primary page's explicit uuid
    /// and all block uuids.
    pub fn declared_identities(&self) -> Vec<Uuid> {
        self.page
            .iter()
            .filter_map(|p| p.uuid)
            .chain(self.blocks.iter().map(|b| b.uuid))
            .collect()
    }
}

/// Turns file text into page and block records.
pub trait Parser: Send + Sync {
    fn parse(&self, path: &str, content: &str, opts: &ParseOptions)
        -> Result<ParsedFile, ParseError>;
}

// ============================================================================
// OutlineParser
// ============================================================================

/// Parser for the indented bullet outline format.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineParser;

struct RawBlock {
    uuid: Uuid,
    explicit_id: bool,
    content: String,
    parent: Option<usize>,
    properties: Properties,
    line: usize,
}

/// Split `key:: value`, accepting only simple keys.
pub(crate) fn property_line(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once("::")?;
    let key = key.trim();
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_');
    valid.then(|| (key.to_lowercase(), value.trim().to_string()))
}

/// Escape a content line written below its block's bullet.
pub(crate) fn escape_continuation(line: &str) -> String {
    let bullet = line == "-" || line.starts_with("- ") || line.starts_with("-\t");
    if bullet || line.starts_with('\\') || property_line(line).is_some() {
        format!("\\{}", line)
    } else {
        line.to_string()
    }
}

static PAGE_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[(.*?)\]\]").expect("Invalid regex"));

static BLOCK_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\((.*?)\)\)").expect("Invalid regex"));

/// Page titles linked with `[[...]]`, in order of appearance.
pub fn extract_page_links(content: &str) -> Vec<String> {
    PAGE_LINK_RE
        .captures_iter(content)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().trim())
        .filter(|title| !title.is_empty())
        .map(str::to_string)
        .collect()
}

/// Block identities referenced with `((uuid))`. Malformed ids are ignored.
pub fn extract_block_refs(content: &str) -> Vec<Uuid> {
    BLOCK_REF_RE
        .captures_iter(content)
        .filter_map(|cap| cap.get(1))
        .filter_map(|m| Uuid::parse_str(m.as_str().trim()).ok())
        .collect()
}

fn title_from_path(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn parse_id(path: &str, line: usize, value: &str) -> Result<Uuid, ParseError> {
    Uuid::parse_str(value)
        .map_err(|e| ParseError::new(path, Some(line), format!("invalid id '{}': {}", value, e)))
}

impl Parser for OutlineParser {
    fn parse(
        &self,
        path: &str,
        content: &str,
        opts: &ParseOptions,
    ) -> Result<ParsedFile, ParseError> {
        let mut page_props = Properties::new();
        let mut page_id: Option<Uuid> = None;
        let mut raw: Vec<RawBlock> = Vec::new();
        // indices into `raw`, one per open depth
        let mut stack: Vec<usize> = Vec::new();
        let mut seen_ids: HashSet<Uuid> = HashSet::new();

        for (index, line) in content.lines().enumerate() {
            let lineno = index + 1;
            if line.trim().is_empty() {
                continue;
            }
            let expanded = line.replace('\t', "  ");
            let trimmed = expanded.trim_start();
            let indent = expanded.len() - trimmed.len();

            let bullet = trimmed == "-" || trimmed.starts_with("- ");
            if bullet {
                if indent % 2 != 0 && opts.strict_indent {
                    return Err(ParseError::new(
                        path,
                        Some(lineno),
                        "indentation must be a multiple of two spaces",
                    ));
                }
                let mut depth = indent / 2;
                if depth > stack.len() {
                    if opts.strict_indent {
                        return Err(ParseError::new(
                            path,
                            Some(lineno),
                            format!(
                                "block is indented {} levels below its parent",
                                depth - stack.len()
                            ),
                        ));
                    }
                    depth = stack.len();
                }
                stack.truncate(depth);
                let text = trimmed.strip_prefix('-').unwrap_or("").trim_start();
                raw.push(RawBlock {
                    uuid: Uuid::new_v4(),
                    explicit_id: false,
                    content: text.to_string(),
                    parent: stack.last().copied(),
                    properties: Properties::new(),
                    line: lineno,
                });
                stack.push(raw.len() - 1);
                continue;
            }

            match raw.last_mut() {
                None => match property_line(trimmed) {
                    Some((key, value)) if key == "id" => {
                        page_id = Some(parse_id(path, lineno, &value)?);
                    }
                    Some((key, value)) => {
                        page_props.insert(key, value);
                    }
                    None => {
                        // Bare text before the first bullet is a top-level block.
                        raw.push(RawBlock {
                            uuid: Uuid::new_v4(),
                            explicit_id: false,
                            content: trimmed.to_string(),
                            parent: None,
                            properties: Properties::new(),
                            line: lineno,
                        });
                        stack = vec![raw.len() - 1];
                    }
                },
                Some(block) => match property_line(trimmed) {
                    Some((key, value)) if key == "id" => {
                        let id = parse_id(path, lineno, &value)?;
                        if block.explicit_id {
                            return Err(ParseError::new(
                                path,
                                Some(lineno),
                                "block declares more than one id",
                            ));
                        }
                        block.uuid = id;
                        block.explicit_id = true;
                    }
                    Some((key, value)) => {
                        block.properties.insert(key, value);
                    }
                    None => {
                        block.content.push('\n');
                        block.content.push_str(trimmed.strip_prefix('\\').unwrap_or(trimmed));
                    }
                },
            }
        }

        for block in &raw {
            if !seen_ids.insert(block.uuid) {
                return Err(ParseError::new(
                    path,
                    Some(block.line),
                    format!("duplicate block id {}", block.uuid),
                ));
            }
        }

        let title = page_props
            .remove("title")
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| title_from_path(path));
        let name = canonicalize(&title);
        if name.is_empty() {
            return Err(ParseError::new(path, None, "page title is empty"));
        }

        // Order keys per sibling group, in document order.
        let mut groups: HashMap<Option<usize>, Vec<usize>> = HashMap::new();
        for (i, block) in raw.iter().enumerate() {
            groups.entry(block.parent).or_default().push(i);
        }
        let mut orders: Vec<String> = vec![String::new(); raw.len()];
        for members in groups.values() {
            let keys = keys_between(None, None, members.len())
                .map_err(|e| ParseError::new(path, None, e.to_string()))?;
            for (i, key) in members.iter().zip(keys) {
                orders[*i] = key;
            }
        }

        let mut stubs: Vec<ParsedPage> = Vec::new();
        let mut stub_names: BTreeSet<CanonicalName> = BTreeSet::new();
        let mut all_refs: BTreeSet<Uuid> = BTreeSet::new();
        let mut blocks = Vec::with_capacity(raw.len());
        for (i, block) in raw.iter().enumerate() {
            let links = extract_page_links(&block.content);
            let mut page_refs = Vec::new();
            for link in &links {
                let link_name = canonicalize(link);
                if link_name.is_empty() {
                    continue;
                }
                if link_name != name && stub_names.insert(link_name.clone()) {
                    stubs.push(ParsedPage::stub(link));
                }
                if !page_refs.contains(&link_name) {
                    page_refs.push(link_name);
                }
            }
            let mut block_refs = extract_block_refs(&block.content);
            block_refs.dedup();
            all_refs.extend(block_refs.iter().copied());

            blocks.push(ParsedBlock {
                uuid: block.uuid,
                content: block.content.clone(),
                parent: block.parent.map(|p| raw[p].uuid),
                order: std::mem::take(&mut orders[i]),
                properties: block.properties.clone(),
                page_refs,
                block_refs,
                explicit_id: block.explicit_id,
                line: block.line,
            });
        }

        tracing::debug!(
            "Parsed {}: page '{}', {} blocks, {} linked pages",
            path,
            name,
            blocks.len(),
            stubs.len()
        );

        Ok(ParsedFile {
            path: path.to_string(),
            content: content.to_string(),
            page: Some(ParsedPage {
                uuid: page_id,
                title: title.trim().to_string(),
                name,
                properties: page_props,
            }),
            pages: stubs,
            blocks,
            refs: all_refs.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str, content: &str) -> Result<ParsedFile, ParseError> {
        OutlineParser.parse(path, content, &ParseOptions::default())
    }

    #[test]
    fn test_parse_nested_outline() {
        let file = parse(
            "pages/Grove.md",
            "- one\n  - one.a\n  - one.b\n    - deep\n- two\n",
        )
        .unwrap();
        let page = file.page.as_ref().unwrap();
        assert_eq!(page.title, "Grove");
        assert_eq!(page.name.as_str(), "grove");
        assert_eq!(file.blocks.len(), 5);

        let one = &file.blocks[0];
        assert_eq!(one.parent, None);
        assert_eq!(file.blocks[1].parent, Some(one.uuid));
        assert_eq!(file.blocks[3].parent, Some(file.blocks[2].uuid));
        assert!(file.blocks[1].order < file.blocks[2].order);
        assert!(one.order < file.blocks[4].order);
    }

    #[test]
    fn test_page_and_block_properties() {
        let id = Uuid::new_v4();
        let text = format!(
            "title:: My Page\ntags:: a, b\n- block\n  id:: {}\n  status:: done\n  more text\n",
            id
        );
        let file = parse("x.md", &text).unwrap();
        let page = file.page.unwrap();
        assert_eq!(page.title, "My Page");
        assert_eq!(page.properties.get("tags").map(String::as_str), Some("a, b"));
        assert!(!page.properties.contains_key("title"));

        let block = &file.blocks[0];
        assert_eq!(block.uuid, id);
        assert!(block.explicit_id);
        assert_eq!(block.properties.get("status").map(String::as_str), Some("done"));
        assert_eq!(block.content, "block\nmore text");
    }

    #[test]
    fn test_links_become_stub_pages() {
        let target = Uuid::new_v4();
        let text = format!("- see [[Other]] and [[other]] and [[Self]]\n- (({}))\n", target);
        let file = parse("Self.md", &text).unwrap();
        assert_eq!(file.pages.len(), 1);
        assert_eq!(file.pages[0].name.as_str(), "other");
        assert_eq!(file.blocks[0].page_refs.len(), 2);
        assert_eq!(file.refs, vec![target]);
    }

    #[test]
    fn test_bad_indentation_is_rejected() {
        let err = parse("bad.md", "- a\n      - too deep\n").unwrap_err();
        assert_eq!(err.line, Some(2));

        let lenient = OutlineParser
            .parse(
                "bad.md",
                "- a\n      - too deep\n",
                &ParseOptions {
                    strict_indent: false,
                },
            )
            .unwrap();
        assert_eq!(lenient.blocks[1].parent, Some(lenient.blocks[0].uuid));
    }

    #[test]
    fn test_invalid_and_duplicate_ids() {
        let err = parse("a.md", "- a\n  id:: not-a-uuid\n").unwrap_err();
        assert!(err.message.contains("invalid id"));

        let id = Uuid::new_v4();
        let text = format!("- a\n  id:: {id}\n- b\n  id:: {id}\n");
        let err = parse("a.md", &text).unwrap_err();
        assert!(err.message.contains("duplicate"));
    }

    #[test]
    fn test_error_display_includes_line() {
        let err = ParseError::new("a.md", Some(3), "boom");
        assert_eq!(err.to_string(), "Parse error in a.md at line 3: boom");
        let err = ParseError::new("a.md", None, "boom");
        assert_eq!(err.to_string(), "Parse error in a.md: boom");
    }
}
