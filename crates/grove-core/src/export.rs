//! File writer: renders page trees back to outline text.
//!
//! One block per line, two spaces of indent per depth level, block
//! properties as `key:: value` lines right after the owning block. The
//! output parses back with [`OutlineParser`](crate::parser::OutlineParser)
//! to the same content and nesting.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::GroveResult;
use crate::model::PageTree;
use crate::parser::escape_continuation;

/// Characters replaced with `_` in file names.
const UNSAFE_FILE_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

const FILE_EXTENSION: &str = "md";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    /// Write `id::` lines so a reload keeps every identity.
    #[serde(default)]
    pub include_ids: bool,
}

/// A rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedFile {
    pub page: Uuid,
    pub file_name: String,
    pub content: String,
}

/// Replace characters that are unsafe in file names with `_`.
pub fn sanitize_file_name(title: &str) -> String {
    title
        .trim()
        .chars()
        .map(|c| if UNSAFE_FILE_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Render one page tree as outline text.
pub fn render_page(tree: &PageTree, opts: &ExportOptions) -> String {
    let mut out = String::new();
    let page = &tree.page;

    // `writeln!` into a String cannot fail.
    let _ = writeln!(out, "title:: {}", page.title);
    for (key, value) in &page.properties {
        let _ = writeln!(out, "{}:: {}", key, value);
    }
    if opts.include_ids {
        let _ = writeln!(out, "id:: {}", page.id);
    }
    if !tree.children.is_empty() {
        out.push('\n');
    }

    for (depth, node) in tree.flatten() {
        let indent = "  ".repeat(depth);
        let mut lines = node.content.split('\n');
        match lines.next().map(str::trim_end) {
            Some(first) if !first.is_empty() => {
                let _ = writeln!(out, "{}- {}", indent, first);
            }
            _ => {
                let _ = writeln!(out, "{}-", indent);
            }
        }
        for line in lines.filter(|l| !l.trim().is_empty()) {
            let _ = writeln!(out, "{}  {}", indent, escape_continuation(line.trim()));
        }
        for (key, value) in &node.properties {
            let _ = writeln!(out, "{}  {}:: {}", indent, key, value);
        }
        if opts.include_ids {
            let _ = writeln!(out, "{}  id:: {}", indent, node.id);
        }
    }
    out
}

/// Render every tree, naming files after the sanitized page title.
pub fn export_pages(trees: &[PageTree], opts: &ExportOptions) -> Vec<ExportedFile> {
    trees
        .iter()
        .map(|tree| ExportedFile {
            page: tree.page.id,
            file_name: format!("{}.{}", sanitize_file_name(&tree.page.title), FILE_EXTENSION),
            content: render_page(tree, opts),
        })
        .collect()
}

/// Write rendered files into `dir`, creating it if needed.
///
/// # Errors
///
/// Returns [`GroveError::Io`](crate::errors::GroveError::Io) if the directory
/// or a file cannot be written.
pub fn write_pages(dir: &Path, files: &[ExportedFile]) -> GroveResult<usize> {
    fs::create_dir_all(dir)?;
    for file in files {
        fs::write(dir.join(&file.file_name), &file.content)?;
    }
    tracing::debug!("Wrote {} pages to {}", files.len(), dir.display());
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::GroveEngine;
    use crate::model::NewBlock;
    use crate::outliner::OpResult;
    use crate::parser::{OutlineParser, ParseOptions, ParsedFile, Parser};
    use tempfile::TempDir;

    fn sample(engine: &GroveEngine) -> PageTree {
        let page = match engine.create_page("Q3: plans/ideas?", None).unwrap().result {
            OpResult::PageCreated { id, .. } => id,
            other => panic!("unexpected result {other:?}"),
        };
        engine
            .insert_blocks(
                vec![
                    NewBlock::new("first [[Other]]")
                        .with_property("status", "open")
                        .with_children(vec![
                            NewBlock::new("nested"),
                            NewBlock::new("two lines\nsecond line")
                                .with_children(vec![NewBlock::new("deep")]),
                        ]),
                    NewBlock::new("last"),
                ],
                page,
                false,
            )
            .unwrap();
        engine.get_page_tree(page).unwrap().unwrap()
    }

    /// `(depth, content, properties)` in document order.
    fn outline(file: &ParsedFile) -> Vec<(usize, String, Vec<(String, String)>)> {
        file.blocks
            .iter()
            .map(|b| {
                let mut depth = 0;
                let mut parent = b.parent;
                while let Some(p) = parent {
                    depth += 1;
                    parent = file.blocks.iter().find(|x| x.uuid == p).and_then(|x| x.parent);
                }
                let props = b.properties.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                (depth, b.content.clone(), props)
            })
            .collect()
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name(r#"a\b/c:d*e?f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_file_name("  Plain  "), "Plain");
    }

    #[test]
    fn test_render_layout() {
        let engine = GroveEngine::in_memory();
        let tree = sample(&engine);
        let text = render_page(&tree, &ExportOptions::default());
        let expected = "\
title:: Q3: plans/ideas?

- first [[Other]]
  status:: open
  - nested
  - two lines
    second line
    - deep
- last
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_round_trip_through_parser() {
        let engine = GroveEngine::in_memory();
        let tree = sample(&engine);
        let exported = export_pages(std::slice::from_ref(&tree), &ExportOptions::default());
        assert_eq!(exported[0].file_name, "Q3_ plans_ideas_.md");

        let parsed = OutlineParser
            .parse(&exported[0].file_name, &exported[0].content, &ParseOptions::default())
            .unwrap();
        assert_eq!(parsed.page.as_ref().unwrap().title, tree.page.title);

        let expected: Vec<(usize, String, Vec<(String, String)>)> = tree
            .flatten()
            .into_iter()
            .map(|(depth, node)| {
                let props = node.properties.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                (depth, node.content.clone(), props)
            })
            .collect();
        assert_eq!(outline(&parsed), expected);
    }

    #[test]
    fn test_continuation_lines_stay_content() {
        let engine = GroveEngine::in_memory();
        let page = match engine.create_page("Errands", None).unwrap().result {
            OpResult::PageCreated { id, .. } => id,
            other => panic!("unexpected result {other:?}"),
        };
        let content = "shopping\n- milk\nnote:: later\n\\raw\n-";
        engine
            .insert_blocks(vec![NewBlock::new(content)], page, false)
            .unwrap();
        let tree = engine.get_page_tree(page).unwrap().unwrap();

        let text = render_page(&tree, &ExportOptions::default());
        assert!(text.contains("  \\- milk\n"));
        assert!(text.contains("  \\note:: later\n"));

        let parsed = OutlineParser
            .parse("Errands.md", &text, &ParseOptions::default())
            .unwrap();
        assert_eq!(outline(&parsed), vec![(0, content.to_string(), Vec::new())]);
    }

    #[test]
    fn test_ids_survive_round_trip() {
        let engine = GroveEngine::in_memory();
        let tree = sample(&engine);
        let text = render_page(&tree, &ExportOptions { include_ids: true });
        let parsed = OutlineParser
            .parse("x.md", &text, &ParseOptions::default())
            .unwrap();
        assert_eq!(parsed.page.unwrap().uuid, Some(tree.page.id));
        let ids: Vec<Uuid> = parsed.blocks.iter().map(|b| b.uuid).collect();
        let expected: Vec<Uuid> = tree.flatten().iter().map(|(_, n)| n.id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_write_pages() {
        let dir = TempDir::new().unwrap();
        let engine = GroveEngine::in_memory();
        let exported = export_pages(&[sample(&engine)], &ExportOptions::default());
        let target = dir.path().join("out");
        assert_eq!(write_pages(&target, &exported).unwrap(), 1);
        let written = fs::read_to_string(target.join(&exported[0].file_name)).unwrap();
        assert_eq!(written, exported[0].content);
    }
}
