//! Integration tests for `grove load`, `grove tree` and `grove pages`.

mod common;

use predicates::prelude::*;
use tempfile::TempDir;

use common::{grove_cmd, write_notes};

const ALPHA: &str = "- first\n  - nested\n- links to [[Beta]]\n";
const BETA: &str = "tags:: reference\n- beta block\n";

fn loaded_graph() -> TempDir {
    let temp = TempDir::new().expect("create temp dir");
    let notes = temp.path().join("notes");
    write_notes(&notes, &[("Alpha.md", ALPHA), ("Beta.md", BETA)]);

    grove_cmd(temp.path(), &temp.path().join("store"))
        .arg("load")
        .arg(&notes)
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded 2/2 files"));
    temp
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_load_then_tree() {
    let temp = loaded_graph();

    grove_cmd(temp.path(), &temp.path().join("store"))
        .args(["tree", "alpha"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Alpha"))
        .stdout(predicate::str::contains("- first\n  - nested\n- links to [[Beta]]"));
}

#[test]
fn test_pages_json_lists_every_page() {
    let temp = loaded_graph();

    let output = grove_cmd(temp.path(), &temp.path().join("store"))
        .args(["pages", "--json"])
        .output()
        .expect("run grove pages");
    assert!(output.status.success());

    let pages: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid json");
    let titles: Vec<&str> = pages
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|p| p["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["Alpha", "Beta"]);
    assert_eq!(pages[1]["properties"]["tags"], "reference");
}

#[test]
fn test_conflicting_ids_commit_nothing() {
    let temp = TempDir::new().expect("create temp dir");
    let notes = temp.path().join("notes");
    let id = "6a3c1a1e-8d0b-4d8e-9d55-2f1b7f0e5c11";
    write_notes(
        &notes,
        &[
            ("One.md", &format!("- one\n  id:: {id}\n")),
            ("Two.md", &format!("- two\n  id:: {id}\n")),
        ],
    );
    let store = temp.path().join("store");

    grove_cmd(temp.path(), &store)
        .arg("load")
        .arg(&notes)
        .assert()
        .failure()
        .stdout(predicate::str::contains(format!("id {id} claimed by file One.md, file Two.md")))
        .stdout(predicate::str::contains("Loaded 0/2 files"));

    grove_cmd(temp.path(), &store)
        .arg("pages")
        .assert()
        .success()
        .stdout(predicate::str::contains("No pages"));
}

#[test]
fn test_load_json_reports_parse_errors() {
    let temp = TempDir::new().expect("create temp dir");
    let notes = temp.path().join("notes");
    write_notes(
        &notes,
        &[("Good.md", "- fine\n"), ("Bad.md", "- ok\n  id:: not-a-uuid\n")],
    );

    let output = grove_cmd(temp.path(), &temp.path().join("store"))
        .args(["load", "--json", "--batch-size", "1"])
        .arg(&notes)
        .output()
        .expect("run grove load");
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(report["status"], "ok");
    assert_eq!(report["committed"], 1);
    assert_eq!(report["parseErrors"][0]["filePath"], "Bad.md");
}

#[test]
fn test_missing_page_fails() {
    let temp = TempDir::new().expect("create temp dir");

    grove_cmd(temp.path(), &temp.path().join("store"))
        .args(["tree", "Nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("[err]"))
        .stderr(predicate::str::contains("Nowhere"));
}

#[test]
fn test_invalid_config_shows_hint() {
    let temp = TempDir::new().expect("create temp dir");
    let config = temp.path().join("config.yaml");
    std::fs::write(&config, "ingest:\n  batch_size: 0\n").expect("write config");

    grove_cmd(temp.path(), &temp.path().join("store"))
        .arg("--config")
        .arg(&config)
        .arg("pages")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Hint:"));
}
