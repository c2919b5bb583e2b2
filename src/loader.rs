//! Loading account specifications from a checked-out accounts repository.
//!
//! Fetching the repository is somebody else's job (a git pull in a timer
//! unit, a config-management file resource). This reads whatever is on disk.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, error};
use walkdir::{DirEntry, WalkDir};

use crate::account::AccountSpec;

/// A specification record that was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    /// File name (or other label) the record came from.
    pub source: String,
    pub error: String,
}

/// Specs that parsed plus the records that didn't.
#[derive(Debug, Default)]
pub struct LoadedSpecs {
    pub specs: Vec<AccountSpec>,
    pub failures: Vec<LoadFailure>,
}

impl LoadedSpecs {
    /// Parse one raw record, keeping either the account spec or the failure.
    ///
    /// A username already seen is rejected so one file can't silently
    /// override another.
    pub fn push_bytes(&mut self, source: &str, bytes: &[u8]) {
        match AccountSpec::from_json(bytes) {
            Ok(spec) if self.specs.iter().any(|s| s.username == spec.username) => {
                self.fail(source, format!("duplicate username '{}'", spec.username));
            }
            Ok(spec) => {
                debug!("{}: loaded {}", source, spec.username);
                self.specs.push(spec);
            }
            Err(e) => {
                self.fail(source, format!("{}: {}", e, compact(bytes)));
            }
        }
    }

    fn fail(&mut self, source: &str, message: String) {
        error!("{}: Error: {}", source, message);
        self.failures.push(LoadFailure {
            source: source.to_string(),
            error: message,
        });
    }
}

/// Parse a batch of raw records. A bad record never stops the others.
pub fn load_specs_from_bytes<'a, I>(records: I) -> LoadedSpecs
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut loaded = LoadedSpecs::default();
    for (source, bytes) in records {
        loaded.push_bytes(source, bytes);
    }
    loaded
}

/// Load every `*.json` file under `repo`, recursively, in path order.
///
/// Hidden directories (`.git` and friends) are skipped. An unreadable
/// file is a per-record failure; an unreadable repo is an error.
pub fn load_specs(repo: &Path) -> Result<LoadedSpecs> {
    if !repo.is_dir() {
        bail!("Accounts repository not found at {}", repo.display());
    }

    let mut loaded = LoadedSpecs::default();
    let walker = WalkDir::new(repo)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", repo.display()))?;
        if !entry.file_type().is_file() || !is_json(&entry) {
            continue;
        }

        let source = entry
            .path()
            .strip_prefix(repo)
            .unwrap_or(entry.path())
            .display()
            .to_string();

        match fs::read(entry.path()) {
            Ok(bytes) => loaded.push_bytes(&source, &bytes),
            Err(e) => loaded.fail(&source, format!("can't read file: {}", e)),
        }
    }

    Ok(loaded)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn is_json(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.len() > 5 && name.to_ascii_lowercase().ends_with(".json"))
        .unwrap_or(false)
}

/// Whitespace-collapsed record text for log lines.
fn compact(bytes: &[u8]) -> String {
    const MAX: usize = 120;
    let text: String = String::from_utf8_lossy(bytes)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if text.chars().count() > MAX {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    } else {
        text
    }
}
