//! Configuration management for userd.
//!
//! Reads configuration from a `.env` file and `USERD_*` environment
//! variables. Environment variables take precedence over `.env`, and
//! command-line flags take precedence over both.

use anyhow::{bail, Context as _, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::distro::{detect_os_id, CommandSet};
use crate::engine::{Context, DEFAULT_MIN_UID};
use crate::realm::{RealmFilter, RealmMatching};

/// Where the host describes itself.
pub const OS_RELEASE: &str = "/etc/os-release";

/// Values given on the command line. `None` defers to env/.env.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub realm: Option<String>,
    pub repo: Option<PathBuf>,
    pub os: Option<String>,
    pub realm_matching: Option<RealmMatching>,
}

/// userd configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// The host's active realm (e.g., "prod")
    pub realm: Option<String>,
    /// Local checkout of the accounts repository
    pub repo: Option<PathBuf>,
    /// OS identifier override (e.g., "debian:12"); detected when unset
    pub os: Option<String>,
    pub realm_matching: RealmMatching,
    /// Accounts below this uid are never modified or deleted
    pub min_uid: u32,
    /// Extra account names never modified or deleted
    pub protected: Vec<String>,
}

impl Config {
    /// Load configuration from `.env` in `base_dir`, the environment, and
    /// command-line overrides.
    pub fn load(base_dir: &Path, overrides: &Overrides) -> Result<Self> {
        let mut vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            let iter = dotenvy::from_path_iter(&env_path)
                .with_context(|| format!("Failed to read {}", env_path.display()))?;
            for item in iter {
                let (key, value) =
                    item.with_context(|| format!("Malformed line in {}", env_path.display()))?;
                vars.insert(key, value);
            }
        }

        // Environment variables override .env file
        vars.extend(std::env::vars().filter(|(key, _)| key.starts_with("USERD_")));

        Self::from_vars(&vars, overrides)
    }

    /// Build a config from already-collected variables.
    pub fn from_vars(vars: &HashMap<String, String>, overrides: &Overrides) -> Result<Self> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let realm_matching = match (overrides.realm_matching, get("USERD_REALM_MATCHING")) {
            (Some(mode), _) => mode,
            (None, Some(value)) => value
                .parse::<RealmMatching>()
                .context("Invalid USERD_REALM_MATCHING")?,
            (None, None) => RealmMatching::default(),
        };

        let min_uid = match get("USERD_MIN_UID") {
            Some(value) => value
                .parse::<u32>()
                .with_context(|| format!("Invalid USERD_MIN_UID '{}'", value))?,
            None => DEFAULT_MIN_UID,
        };

        let protected = get("USERD_PROTECTED")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            realm: overrides.realm.clone().or_else(|| get("USERD_REALM")),
            repo: overrides
                .repo
                .clone()
                .or_else(|| get("USERD_REPO").map(PathBuf::from)),
            os: overrides.os.clone().or_else(|| get("USERD_OS")),
            realm_matching,
            min_uid,
            protected,
        })
    }

    pub fn require_realm(&self) -> Result<&str> {
        match self.realm.as_deref() {
            Some(realm) => Ok(realm),
            None => bail!("No realm given. Pass --realm or set USERD_REALM."),
        }
    }

    pub fn require_repo(&self) -> Result<&Path> {
        match self.repo.as_deref() {
            Some(repo) => Ok(repo),
            None => bail!("No accounts repository given. Pass --repo or set USERD_REPO."),
        }
    }

    /// The OS identifier: the configured override, else `/etc/os-release`.
    pub fn os_id(&self) -> Result<String> {
        if let Some(os) = &self.os {
            return Ok(os.clone());
        }
        let content = fs::read_to_string(OS_RELEASE)
            .with_context(|| format!("Failed to read {}", OS_RELEASE))?;
        match detect_os_id(&content) {
            Some(id) => Ok(id),
            None => bail!("Unable to detect operating system from {}", OS_RELEASE),
        }
    }

    /// Build the engine context. Fails on anything that must stop a run
    /// before it touches an account.
    pub fn context(&self) -> Result<Context> {
        let realm = RealmFilter::new(self.require_realm()?, self.realm_matching);
        let commands = CommandSet::for_os(&self.os_id()?)?;
        Ok(Context::new(realm, commands)
            .with_protected(self.protected.iter().cloned())
            .with_min_uid(self.min_uid))
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        let unset = || "(unset)".to_string();
        println!("Configuration:");
        println!("  USERD_REALM: {}", self.realm.clone().unwrap_or_else(unset));
        println!(
            "  USERD_REPO: {}",
            self.repo
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(unset)
        );
        println!(
            "  USERD_OS: {}",
            self.os.clone().unwrap_or_else(|| "(detect)".to_string())
        );
        println!("  USERD_REALM_MATCHING: {}", self.realm_matching);
        println!("  USERD_MIN_UID: {}", self.min_uid);
        let mut protected = vec!["root".to_string()];
        protected.extend(self.protected.iter().cloned());
        println!("  USERD_PROTECTED: {}", protected.join(","));
        match &self.repo {
            Some(repo) if repo.is_dir() => println!("  Accounts repo: FOUND"),
            Some(_) => println!("  Accounts repo: NOT FOUND"),
            None => {}
        }
    }
}
