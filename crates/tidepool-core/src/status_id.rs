//! Status-id ordering.
//!
//! Mastodon status ids are decimal-string encoded integers that can exceed
//! 64 bits. Recency comparisons must be numeric, never lexical: `"9"` is
//! older than `"10"`. Comparing (digit length after stripping leading
//! zeros, then lexically) is equivalent to arbitrary-precision integer
//! comparison for decimal strings.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque remote status identifier, totally ordered by numeric magnitude.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusId(pub String);

impl StatusId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits with leading zeros stripped. A value of all zeros (or the
    /// empty string) normalizes to "0".
    fn significant(&self) -> &str {
        let trimmed = self.0.trim_start_matches('0');
        if trimmed.is_empty() {
            "0"
        } else {
            trimmed
        }
    }
}

impl Ord for StatusId {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.significant();
        let b = other.significant();
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }
}

impl PartialOrd for StatusId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for StatusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StatusId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StatusId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
