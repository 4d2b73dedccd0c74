//! Formatting utilities for CLI output.

use chrono::{DateTime, Utc};
use grove_core::PageTree;

/// Truncate to at most `max_chars` characters, ending in `...` when cut.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_str("hello", 10), "hello");
/// assert_eq!(truncate_str("hello world", 8), "hello...");
/// ```
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars <= 3 {
        return ".".repeat(max_chars);
    }
    let kept: String = s.chars().take(max_chars - 3).collect();
    format!("{}...", kept)
}

/// Relative time for recent timestamps, a date otherwise.
///
/// - Under a minute: "just now"
/// - Under an hour: "5 mins ago"
/// - Under a day: "3h ago"
/// - Under a week: "2d ago"
/// - Older or in the future: "2025-01-15"
pub fn format_relative_time(timestamp: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(timestamp);

    if duration.num_seconds() < 0 || duration.num_days() >= 7 {
        timestamp.format("%Y-%m-%d").to_string()
    } else if duration.num_minutes() < 1 {
        "just now".to_string()
    } else if duration.num_hours() < 1 {
        format!("{} mins ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else {
        format!("{}d ago", duration.num_days())
    }
}

/// Outline lines for a page tree: one bullet per block, two spaces per level.
///
/// Multi-line content is flattened to its first line.
pub fn outline_lines(tree: &PageTree, max_chars: usize) -> Vec<String> {
    tree.flatten()
        .into_iter()
        .map(|(depth, node)| {
            let first = node.content.lines().next().unwrap_or("");
            format!("{}- {}", "  ".repeat(depth), truncate_str(first, max_chars))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use grove_core::{GroveEngine, NewBlock, OpResult};

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 5), "hello");
        assert_eq!(truncate_str("hello world", 8), "hello...");
        assert_eq!(truncate_str("héllo wörld", 8), "héllo...");
        assert_eq!(truncate_str("hello", 3), "...");
    }

    #[test]
    fn test_relative_time() {
        let now = Utc::now();
        assert_eq!(format_relative_time(now), "just now");
        assert_eq!(format_relative_time(now - Duration::hours(3)), "3h ago");
        let old = now - Duration::days(30);
        assert_eq!(format_relative_time(old), old.format("%Y-%m-%d").to_string());
    }

    #[test]
    fn test_outline_lines() {
        let engine = GroveEngine::in_memory();
        let OpResult::PageCreated { id, .. } = engine.create_page("Tree", None).unwrap().result
        else {
            panic!("page not created");
        };
        engine
            .insert_blocks(
                vec![NewBlock::new("parent\nsecond line")
                    .with_children(vec![NewBlock::new("child")])],
                id,
                false,
            )
            .unwrap();
        let tree = engine.get_page_tree(id).unwrap().unwrap();
        assert_eq!(outline_lines(&tree, 80), vec!["- parent", "  - child"]);
    }
}
