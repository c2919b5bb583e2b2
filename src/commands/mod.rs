//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `sync` - Reconcile accounts (also `plan`, the dry run)
//! - `show` - Display information
//! - `preflight` - Run preflight checks

mod preflight;
pub mod show;
mod sync;

pub use preflight::cmd_preflight;
pub use show::cmd_show;
pub use sync::cmd_sync;
