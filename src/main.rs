//! userd - local account reconciler.
//!
//! Makes the host's Unix accounts match a directory of JSON account specs:
//! - creates and updates accounts whose realms match this host
//! - deletes spec'd accounts whose realms don't
//! - rewrites `~/.ssh/authorized_keys` from the account spec

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use userd::config::{Config, Overrides};
use userd::realm::RealmMatching;

#[derive(Parser)]
#[command(name = "userd")]
#[command(about = "Reconcile local Unix accounts against a repository of JSON account specs")]
#[command(
    after_help = "QUICK START:\n  userd preflight  Check this host is ready\n  userd plan       Show what would change\n  userd sync       Apply changes (as root)"
)]
struct Cli {
    /// Active realm for this host (overrides USERD_REALM)
    #[arg(long, global = true)]
    realm: Option<String>,

    /// Accounts repository checkout (overrides USERD_REPO)
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// OS identifier, e.g. debian:12 (overrides USERD_OS and detection)
    #[arg(long, global = true)]
    os: Option<String>,

    /// How realm patterns are matched: glob or exact
    #[arg(long, global = true)]
    realm_matching: Option<RealmMatching>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile accounts (requires root)
    Sync,

    /// Show what sync would do, without changing anything
    Plan,

    /// Run preflight checks (privileges, OS support, tools, config)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config,
    /// Show the detected OS and the commands used for it
    Os,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .init();

    let base_dir = std::env::current_dir()?;
    let overrides = Overrides {
        realm: cli.realm,
        repo: cli.repo,
        os: cli.os,
        realm_matching: cli.realm_matching,
    };
    let config = Config::load(&base_dir, &overrides)?;

    match cli.command {
        Commands::Sync => {
            commands::cmd_sync(&config, false)?;
        }

        Commands::Plan => {
            commands::cmd_sync(&config, true)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Os => commands::show::ShowTarget::Os,
            };
            commands::cmd_show(show_target, &config)?;
        }
    }

    Ok(())
}
