//! Realm matching.
//!
//! One [`RealmFilter`] decides both whether an account belongs on this host
//! and whether a realm-scoped group token applies. Both questions must get
//! the same answer for the same pattern list.

use anyhow::{bail, Result};
use glob::Pattern;
use std::fmt;
use std::str::FromStr;

/// How realm patterns are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RealmMatching {
    /// Exact names plus shell-style globs (`*`, `?`, `[...]`).
    #[default]
    Glob,
    /// Exact names only. Older deployments relied on this, where a realm
    /// literally named `prod*` meant just that.
    Exact,
}

impl FromStr for RealmMatching {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "glob" => Ok(RealmMatching::Glob),
            "exact" => Ok(RealmMatching::Exact),
            other => bail!("Unknown realm matching mode '{}' (expected glob or exact)", other),
        }
    }
}

impl fmt::Display for RealmMatching {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RealmMatching::Glob => write!(f, "glob"),
            RealmMatching::Exact => write!(f, "exact"),
        }
    }
}

/// The host's active realm plus the matching rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmFilter {
    active: String,
    mode: RealmMatching,
}

impl RealmFilter {
    pub fn new(active: impl Into<String>, mode: RealmMatching) -> Self {
        Self {
            active: active.into(),
            mode,
        }
    }

    pub fn active(&self) -> &str {
        &self.active
    }

    /// True if any pattern selects the active realm. An empty list never
    /// matches.
    pub fn matches<S: AsRef<str>>(&self, patterns: &[S]) -> bool {
        patterns.iter().any(|p| self.matches_one(p.as_ref()))
    }

    fn matches_one(&self, pattern: &str) -> bool {
        if pattern == self.active {
            return true;
        }
        match self.mode {
            RealmMatching::Exact => false,
            // A malformed glob degrades to the exact comparison above
            RealmMatching::Glob => Pattern::new(pattern)
                .map(|p| p.matches(&self.active))
                .unwrap_or(false),
        }
    }
}
