//! `~/.ssh/authorized_keys` synchronization.
//!
//! The file is owned by the account spec: on any difference it is rewritten whole
//! with the desired keys, never merged.

use anyhow::{bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{lchown, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::account::is_safe_name;

const SSH_DIR: &str = ".ssh";
const AUTHORIZED_KEYS: &str = "authorized_keys";

/// Numeric owner applied to the `.ssh` tree after a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyOwner {
    pub uid: u32,
    pub gid: u32,
}

/// Path of the authorized keys file under a home directory.
pub fn key_file(home: &Path) -> PathBuf {
    home.join(SSH_DIR).join(AUTHORIZED_KEYS)
}

/// Current keys: trimmed, non-blank lines, sorted. A missing file is empty.
pub fn read_keys(home: &Path) -> Result<Vec<String>> {
    let path = key_file(home);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    let mut keys: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    keys.sort();
    Ok(keys)
}

/// Compare as joined, sorted strings.
pub fn keys_match(desired: &[String], current: &[String]) -> bool {
    let mut desired = desired.to_vec();
    desired.sort();
    desired.join("\n") == current.join("\n")
}

/// Bring the authorized keys file in line with `desired`.
///
/// Returns `Ok(true)` if the file was rewritten and `Ok(false)` if it
/// already matched.
pub fn sync(
    username: &str,
    home: &Path,
    desired: &[String],
    owner: Option<KeyOwner>,
) -> Result<bool> {
    if !is_safe_name(username) {
        bail!("Refusing to manage ssh keys for unsafe username '{}'", username);
    }

    let current = read_keys(home)?;
    if keys_match(desired, &current) {
        return Ok(false);
    }

    write_keys(home, desired, owner)?;
    Ok(true)
}

fn write_keys(home: &Path, desired: &[String], owner: Option<KeyOwner>) -> Result<()> {
    let ssh_dir = home.join(SSH_DIR);
    let key_path = ssh_dir.join(AUTHORIZED_KEYS);

    // Never follow a link the account owner controls.
    refuse_symlink(&ssh_dir)?;
    refuse_symlink(&key_path)?;

    if !ssh_dir.exists() {
        fs::create_dir(&ssh_dir)
            .with_context(|| format!("Failed to create {}", ssh_dir.display()))?;
    }
    fs::set_permissions(&ssh_dir, fs::Permissions::from_mode(0o700))
        .with_context(|| format!("Failed to set permissions on {}", ssh_dir.display()))?;

    let mut sorted = desired.to_vec();
    sorted.sort();
    let mut content = sorted.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }

    let mut file = open_key_file(&key_path)?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write {}", key_path.display()))?;
    file.set_permissions(fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to set permissions on {}", key_path.display()))?;

    if let Some(owner) = owner {
        chown_tree(&ssh_dir, owner)?;
    }
    Ok(())
}

/// Open for rewrite. A symlink swapped in after `refuse_symlink` still
/// fails here.
fn open_key_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

fn refuse_symlink(path: &Path) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(path) {
        if meta.file_type().is_symlink() {
            bail!("Refusing to write through symlink {}", path.display());
        }
    }
    Ok(())
}

fn chown_tree(root: &Path, owner: KeyOwner) -> Result<()> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        lchown(entry.path(), Some(owner.uid), Some(owner.gid))
            .with_context(|| format!("Failed to chown {}", entry.path().display()))?;
    }
    Ok(())
}
