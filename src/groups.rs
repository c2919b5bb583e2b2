//! Supplementary group resolution.
//!
//! Group tokens in a spec may be scoped to realms:
//!
//! ```text
//! "audio"              member of audio in every realm
//! "video:prod"         member of video only in prod
//! "sudo:prod:stage-*"  member of sudo in prod and any stage-* realm
//! ```

use crate::account::is_safe_name;
use crate::realm::RealmFilter;

/// Resolve group tokens to the sorted, duplicate-free list of groups the
/// account should belong to on this host.
///
/// Drops tokens scoped to other realms, the user's own primary group, and
/// any group `exists` says isn't on this host. Groups are never created.
pub fn resolve<F>(
    tokens: &[String],
    username: &str,
    filter: &RealmFilter,
    mut exists: F,
) -> Vec<String>
where
    F: FnMut(&str) -> bool,
{
    let mut groups: Vec<String> = tokens
        .iter()
        .filter_map(|token| {
            let mut parts = token.split(':');
            let name = parts.next()?.trim();
            let realms: Vec<&str> = parts.collect();
            if !realms.is_empty() && !filter.matches(&realms) {
                return None;
            }
            Some(name)
        })
        .filter(|name| is_safe_name(name))
        .filter(|name| *name != username)
        .map(str::to_string)
        .collect();

    groups.sort();
    groups.dedup();
    groups.retain(|g| exists(g));
    groups
}

/// Normalize observed memberships the same way: primary group removed,
/// sorted, unique.
pub fn normalize_memberships(mut groups: Vec<String>, username: &str) -> Vec<String> {
    groups.retain(|g| g != username);
    groups.sort();
    groups.dedup();
    groups
}
