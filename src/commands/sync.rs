//! Sync and plan commands - reconcile the host against the accounts repo.

use anyhow::{bail, Result};
use tracing::info;

use userd::config::Config;
use userd::engine::Engine;
use userd::host::SystemDatabase;
use userd::loader;
use userd::preflight;
use userd::process::{self, SystemRunner};

/// Execute the sync command. With `dry_run` nothing is changed and no root
/// is needed.
pub fn cmd_sync(config: &Config, dry_run: bool) -> Result<()> {
    preflight::run_preflight_or_fail(config, !dry_run)?;

    let ctx = config.context()?;
    process::ensure_programs(ctx.commands.required_programs().iter().copied())?;

    let repo = config.require_repo()?;
    info!("Loading account specs from {}", repo.display());
    let loaded = loader::load_specs(repo)?;

    let db = SystemDatabase;
    let mut runner = SystemRunner;
    let mut report = Engine::new(&ctx, &db, &mut runner)
        .dry_run(dry_run)
        .run(&loaded.specs);
    report.load_failures = loaded.failures;

    report.print();

    if dry_run {
        println!("\nDry run: nothing was changed.");
        return Ok(());
    }
    if report.has_failures() {
        bail!(
            "Sync finished with failures: {} account(s), {} unreadable record(s)",
            report.failed_accounts().len(),
            report.load_failures.len()
        );
    }
    Ok(())
}
