//! Preflight checks for userd.
//!
//! Validates privileges, OS support, host tools and configuration before
//! any account is touched. Run with `userd preflight` to check a host.

mod environment;
mod host_tools;
mod types;

use anyhow::{bail, Result};

use crate::config::Config;

pub use environment::effective_uid;
pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks. `need_root` is false for read-only commands.
pub fn run_preflight(config: &Config, need_root: bool) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    // =======================================================================
    // Privileges
    // =======================================================================
    if need_root {
        println!("Checking privileges...");
        checks.push(environment::check_privileges(effective_uid()));
    }

    // =======================================================================
    // Operating System and Host Tools
    // =======================================================================
    println!("Checking operating system...");
    let (os_check, commands) = environment::check_os(config);
    checks.push(os_check);

    println!("Checking host tools...");
    match commands {
        Some(commands) => checks.extend(host_tools::check_host_tools(&commands)),
        None => checks.push(CheckResult::skip("host tools", "unknown operating system")),
    }

    // =======================================================================
    // Configuration
    // =======================================================================
    println!("Checking configuration...");
    checks.push(environment::check_realm(config));
    checks.push(environment::check_repo(config));

    println!();

    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(config: &Config, need_root: bool) -> Result<()> {
    let report = run_preflight(config, need_root);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before syncing.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
