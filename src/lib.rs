//! userd - reconcile local Unix accounts against a repository of JSON
//! account specs.
//!
//! The binary wires these together; integration tests drive the engine
//! directly with an in-memory host.

pub mod account;
pub mod config;
pub mod distro;
pub mod engine;
pub mod groups;
pub mod host;
pub mod loader;
pub mod preflight;
pub mod process;
pub mod realm;
pub mod sshkeys;
