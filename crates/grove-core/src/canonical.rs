//! Page name canonicalization.
//!
//! A page's canonical name is its identity key. It is derived from the
//! human-readable title by lowercasing, Unicode NFC normalization and trimming
//! whitespace and path separators from both ends.

use std::fmt;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Characters stripped from both ends of a name.
const TRIMMED: [char; 2] = ['/', '\\'];

/// A canonical page name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalName(String);

impl CanonicalName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonicalize a page title. Total, deterministic and idempotent.
pub fn canonicalize(name: &str) -> CanonicalName {
    let lowered: String = name.to_lowercase().nfc().collect();
    let trimmed = lowered.trim_matches(|c: char| c.is_whitespace() || TRIMMED.contains(&c));
    CanonicalName(trimmed.to_string())
}
