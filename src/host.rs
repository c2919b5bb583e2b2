//! Read access to the host's account, group and shadow databases.
//!
//! Everything is queried per account through `getent` and `id`, so NSS
//! sources beyond the flat files are honoured and nothing goes stale between
//! accounts in one run.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use crate::process::Cmd;

/// `getent` exit code for "key not found in database".
const GETENT_NOT_FOUND: i32 = 2;

/// One passwd entry (man 5 passwd).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemAccount {
    pub username: String,
    pub password: String,
    pub uid: u32,
    pub gid: u32,
    pub comment: String,
    pub home: PathBuf,
    pub shell: String,
}

/// Read-only view of the host's account state.
pub trait AccountDatabase {
    /// Look up an account. `Ok(None)` means it doesn't exist.
    fn user(&self, username: &str) -> Result<Option<SystemAccount>>;

    /// The hash field from the shadow database.
    fn password_hash(&self, username: &str) -> Result<Option<String>>;

    fn group_exists(&self, group: &str) -> Result<bool>;

    /// Names of every group the user belongs to, primary included.
    fn user_groups(&self, username: &str) -> Result<Vec<String>>;
}

/// The live host, queried through `getent` and `id`.
#[derive(Debug, Default)]
pub struct SystemDatabase;

impl SystemDatabase {
    fn getent(database: &str, key: &str) -> Result<Option<String>> {
        let result = Cmd::new("getent")
            .args([database, key])
            .allow_fail()
            .run()?;

        match result.code() {
            0 => Ok(result
                .stdout
                .lines()
                .next()
                .map(|line| line.to_string())),
            GETENT_NOT_FOUND => Ok(None),
            code => bail!(
                "getent {} {} failed (exit code {}): {}",
                database,
                key,
                code,
                result.diagnostic()
            ),
        }
    }
}

impl AccountDatabase for SystemDatabase {
    fn user(&self, username: &str) -> Result<Option<SystemAccount>> {
        Self::getent("passwd", username)?
            .map(|line| parse_passwd_line(&line))
            .transpose()
    }

    fn password_hash(&self, username: &str) -> Result<Option<String>> {
        Self::getent("shadow", username)?
            .map(|line| parse_shadow_hash(&line))
            .transpose()
    }

    fn group_exists(&self, group: &str) -> Result<bool> {
        Ok(Self::getent("group", group)?.is_some())
    }

    fn user_groups(&self, username: &str) -> Result<Vec<String>> {
        let result = Cmd::new("id")
            .args(["-Gn", username])
            .error_msg(format!("Failed to read groups for {}", username))
            .run()?;
        Ok(result
            .stdout
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }
}

/// Parse one passwd line.
pub fn parse_passwd_line(line: &str) -> Result<SystemAccount> {
    let parts: Vec<&str> = line.trim_end_matches('\n').split(':').collect();
    if parts.len() != 7 {
        bail!(
            "Bad number of fields in passwd entry ({} instead of 7): {}",
            parts.len(),
            line
        );
    }

    let uid: u32 = parts[2].parse().with_context(|| {
        format!(
            "Corrupted passwd entry: invalid UID '{}' for user '{}'",
            parts[2], parts[0]
        )
    })?;
    let gid: u32 = parts[3].parse().with_context(|| {
        format!(
            "Corrupted passwd entry: invalid GID '{}' for user '{}'",
            parts[3], parts[0]
        )
    })?;

    Ok(SystemAccount {
        username: parts[0].to_string(),
        password: parts[1].to_string(),
        uid,
        gid,
        comment: parts[4].trim().to_string(),
        home: PathBuf::from(parts[5].trim()),
        shell: parts[6].trim().to_string(),
    })
}

/// Extract the hash field from one shadow line.
pub fn parse_shadow_hash(line: &str) -> Result<String> {
    let mut parts = line.split(':');
    match (parts.next(), parts.next()) {
        (Some(_), Some(hash)) => Ok(hash.trim().to_string()),
        _ => bail!("Corrupted shadow entry (no hash field)"),
    }
}
