//! Shared test utilities for grove-cli integration tests.

use std::fs;
use std::path::Path;

use assert_cmd::Command;

/// A `grove` command isolated from the user's config, writing to `store`.
#[allow(deprecated)]
pub fn grove_cmd(home: &Path, store: &Path) -> Command {
    let mut cmd = Command::cargo_bin("grove").expect("grove binary should exist");
    cmd.env("HOME", home)
        .env_remove("GROVE_CONFIG")
        .env_remove("GROVE_STORE")
        .env("NO_COLOR", "1")
        .arg("--store")
        .arg(store);
    cmd
}

/// Write outline files into `dir`.
pub fn write_notes(dir: &Path, files: &[(&str, &str)]) {
    fs::create_dir_all(dir).expect("create notes dir");
    for (name, content) in files {
        fs::write(dir.join(name), content).expect("write note");
    }
}
