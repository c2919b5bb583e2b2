//! Host environment checks (privileges, OS, configuration, accounts repo).

use std::path::Path;

use crate::config::Config;
use crate::distro::CommandSet;
use crate::loader;

use super::types::CheckResult;

/// Effective uid of this process.
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no failure mode
    unsafe { libc::geteuid() }
}

/// Account changes need root.
pub fn check_privileges(euid: u32) -> CheckResult {
    if euid == 0 {
        CheckResult::pass("root privileges")
    } else {
        CheckResult::fail(
            "root privileges",
            &format!("Running as uid {}. sync must run as root.", euid),
        )
    }
}

/// Resolve the command set for this host. The check and, on success, the
/// command set so later checks can use it.
pub fn check_os(config: &Config) -> (CheckResult, Option<CommandSet>) {
    let os_id = match config.os_id() {
        Ok(id) => id,
        Err(e) => return (CheckResult::fail("operating system", &format!("{:#}", e)), None),
    };

    match CommandSet::for_os(&os_id) {
        Ok(commands) => {
            let check = CheckResult::pass_with(
                "operating system",
                &format!("{} ({} family)", os_id, commands.family()),
            );
            (check, Some(commands))
        }
        Err(e) => (CheckResult::fail("operating system", &format!("{:#}", e)), None),
    }
}

pub fn check_realm(config: &Config) -> CheckResult {
    match config.require_realm() {
        Ok(realm) => CheckResult::pass_with(
            "realm",
            &format!("'{}' ({} matching)", realm, config.realm_matching),
        ),
        Err(e) => CheckResult::fail("realm", &e.to_string()),
    }
}

/// The repo must exist and hold at least one record.
pub fn check_repo(config: &Config) -> CheckResult {
    let repo = match config.require_repo() {
        Ok(repo) => repo,
        Err(e) => return CheckResult::fail("accounts repo", &e.to_string()),
    };
    check_repo_dir(repo)
}

fn check_repo_dir(repo: &Path) -> CheckResult {
    let loaded = match loader::load_specs(repo) {
        Ok(loaded) => loaded,
        Err(e) => return CheckResult::fail("accounts repo", &format!("{:#}", e)),
    };

    let summary = format!(
        "{}: {} specs, {} unreadable",
        repo.display(),
        loaded.specs.len(),
        loaded.failures.len()
    );
    if loaded.specs.is_empty() {
        CheckResult::warn("accounts repo", &format!("{} - nothing to manage", summary))
    } else if !loaded.failures.is_empty() {
        CheckResult::warn("accounts repo", &summary)
    } else {
        CheckResult::pass_with("accounts repo", &summary)
    }
}
