//! Account specifications: the desired state of one user account.
//!
//! Each JSON file in the accounts repository describes one account:
//!
//! ```json
//! {
//!   "username": "alice",
//!   "comment": "Alice Example",
//!   "password": "$6$...",
//!   "shell": "/bin/zsh",
//!   "groups": ["audio", "sudo:prod:stage"],
//!   "realms": ["prod", "stage-*"],
//!   "ssh_keys": ["ssh-ed25519 AAAA... alice@laptop"]
//! }
//! ```
//!
//! Parsing applies defaults and rejects values that could escape into a
//! command argument or a path.

use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Shell used when a spec doesn't name one.
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Longest username accepted by shadow-utils.
const MAX_NAME_LEN: usize = 32;

/// Why a specification record was rejected.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("parse or type error in JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing 'username'")]
    MissingUsername,

    #[error("unsafe username '{0}'")]
    UnsafeUsername(String),

    #[error("{field} for '{username}' must be an absolute path without control characters: {value:?}")]
    BadPath {
        username: String,
        field: &'static str,
        value: String,
    },

    #[error("password for '{0}' contains ':' or control characters")]
    BadPassword(String),
}

/// Raw JSON shape. Unknown keys (old specs carry `uid`/`gid`) are ignored.
#[derive(Debug, Deserialize)]
struct RawSpec {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    shell: Option<String>,
    #[serde(default)]
    home: Option<String>,
    #[serde(default)]
    groups: Option<Vec<String>>,
    #[serde(default)]
    realms: Option<Vec<String>>,
    #[serde(default)]
    ssh_keys: Option<Vec<String>>,
}

/// Desired state for one account, with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSpec {
    pub username: String,
    /// Raw comment as written. Use [`AccountSpec::gecos`] for the on-host form.
    pub comment: String,
    /// Pre-hashed password. `None` leaves the host's hash alone.
    pub password: Option<String>,
    pub shell: String,
    pub home: PathBuf,
    /// Group tokens, possibly realm-scoped (`name:realm1:realm2`).
    pub groups: Vec<String>,
    pub realms: Vec<String>,
    /// Sorted, unique public key lines.
    pub ssh_keys: Vec<String>,
}

impl AccountSpec {
    /// Parse one specification record.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SpecError> {
        let raw: RawSpec = serde_json::from_slice(bytes)?;

        let username = raw
            .username
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or(SpecError::MissingUsername)?;
        if !is_safe_name(&username) {
            return Err(SpecError::UnsafeUsername(username));
        }

        let home = match raw.home.filter(|h| !h.trim().is_empty()) {
            Some(h) => checked_path(&username, "home", h.trim())?,
            None => clean_path(&Path::new("/home").join(&username)),
        };

        let shell = match raw.shell.filter(|s| !s.trim().is_empty()) {
            Some(s) => checked_path(&username, "shell", s.trim())?
                .display()
                .to_string(),
            None => DEFAULT_SHELL.to_string(),
        };

        let password = raw.password.filter(|p| !p.is_empty());
        if let Some(p) = &password {
            if p.contains(':') || p.chars().any(char::is_control) {
                return Err(SpecError::BadPassword(username));
            }
        }

        let mut ssh_keys: Vec<String> = raw
            .ssh_keys
            .unwrap_or_default()
            .iter()
            .flat_map(|k| k.lines())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        ssh_keys.sort();
        ssh_keys.dedup();

        Ok(Self {
            username,
            comment: raw.comment.unwrap_or_default(),
            password,
            shell,
            home,
            groups: raw.groups.unwrap_or_default(),
            realms: raw.realms.unwrap_or_default(),
            ssh_keys,
        })
    }

    /// The comment as it will be stored in the GECOS field.
    pub fn gecos(&self) -> String {
        sanitize_comment(&self.comment)
    }
}

/// Keep ASCII letters, digits and spaces, trimmed. The passwd entry is
/// read back trimmed, so the stored form must be too.
pub fn sanitize_comment(comment: &str) -> String {
    comment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Whether a user or group name is safe to hand to account tools and to
/// join into paths: `[a-z_][a-z0-9_.-]*` with an optional trailing `$`.
pub fn is_safe_name(name: &str) -> bool {
    let body = name.strip_suffix('$').unwrap_or(name);
    let mut chars = body.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_NAME_LEN
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'))
}

/// Lexically normalize a path: collapse separators, drop `.`, resolve `..`.
/// Does not touch the filesystem.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !path.is_absolute() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(if path.is_absolute() { "/" } else { "." });
    }
    out
}

fn checked_path(username: &str, field: &'static str, value: &str) -> Result<PathBuf, SpecError> {
    let path = Path::new(value);
    if !path.is_absolute() || value.chars().any(char::is_control) {
        return Err(SpecError::BadPath {
            username: username.to_string(),
            field,
            value: value.to_string(),
        });
    }
    Ok(clean_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let spec = AccountSpec::from_json(br#"{"username":"alice","realms":["prod"]}"#).unwrap();
        assert_eq!(spec.shell, "/bin/bash");
        assert_eq!(spec.home, PathBuf::from("/home/alice"));
        assert_eq!(spec.password, None);
        assert!(spec.groups.is_empty());
        assert_eq!(spec.realms, vec!["prod"]);
    }

    #[test]
    fn test_home_and_shell_cleaned() {
        let spec = AccountSpec::from_json(
            br#"{"username":"bob","home":"/srv//users/./bob/../bob/","shell":"/usr//bin/zsh"}"#,
        )
        .unwrap();
        assert_eq!(spec.home, PathBuf::from("/srv/users/bob"));
        assert_eq!(spec.shell, "/usr/bin/zsh");
    }

    #[test]
    fn test_missing_or_empty_username_rejected() {
        assert!(matches!(
            AccountSpec::from_json(br#"{"realms":["prod"]}"#),
            Err(SpecError::MissingUsername)
        ));
        assert!(matches!(
            AccountSpec::from_json(br#"{"username":"  "}"#),
            Err(SpecError::MissingUsername)
        ));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            AccountSpec::from_json(b"{\"username\": \"alice\""),
            Err(SpecError::Json(_))
        ));
        // Wrong type for a field is a JSON error too
        assert!(matches!(
            AccountSpec::from_json(br#"{"username":"alice","groups":"sudo"}"#),
            Err(SpecError::Json(_))
        ));
    }

    #[test]
    fn test_unsafe_values_rejected() {
        for name in ["../etc", "Alice", "al ice", "-rf", "a;b", "bob,adm"] {
            let json = format!(r#"{{"username":"{}"}}"#, name);
            assert!(
                matches!(AccountSpec::from_json(json.as_bytes()), Err(SpecError::UnsafeUsername(_))),
                "{} should be rejected",
                name
            );
        }
        assert!(matches!(
            AccountSpec::from_json(br#"{"username":"eve","home":"relative/eve"}"#),
            Err(SpecError::BadPath { field: "home", .. })
        ));
        assert!(matches!(
            AccountSpec::from_json(br#"{"username":"eve","password":"a:b"}"#),
            Err(SpecError::BadPassword(_))
        ));
    }

    #[test]
    fn test_ignores_legacy_fields_and_nulls() {
        let spec = AccountSpec::from_json(
            br#"{"username":"carol","uid":8800,"gid":8800,"shell":null,"groups":null}"#,
        )
        .unwrap();
        assert_eq!(spec.shell, DEFAULT_SHELL);
        assert!(spec.groups.is_empty());
    }

    #[test]
    fn test_ssh_keys_normalized() {
        let spec = AccountSpec::from_json(
            br#"{"username":"dave","ssh_keys":["ssh-rsa BBB d@b ", "", "ssh-ed25519 AAA d@a", "ssh-rsa BBB d@b"]}"#,
        )
        .unwrap();
        assert_eq!(spec.ssh_keys, vec!["ssh-ed25519 AAA d@a", "ssh-rsa BBB d@b"]);
    }

    #[test]
    fn test_sanitize_comment() {
        assert_eq!(sanitize_comment("Alice O'Neil, Ops <a@b>"), "Alice ONeil Ops ab");
        assert_eq!(sanitize_comment("Zoë 2"), "Zo 2");
        assert_eq!(sanitize_comment("Zoe Smith (ops) :)"), "Zoe Smith ops");
        assert_eq!(sanitize_comment("- Alice"), "Alice");
    }

    #[test]
    fn test_safe_names() {
        assert!(is_safe_name("alice"));
        assert!(is_safe_name("_svc-web.1"));
        assert!(is_safe_name("machine$"));
        assert!(!is_safe_name(""));
        assert!(!is_safe_name("$"));
        assert!(!is_safe_name("1alice"));
        assert!(!is_safe_name(&"a".repeat(33)));
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("/a/b/../../..")), PathBuf::from("/"));
        assert_eq!(clean_path(Path::new("/home//x/")), PathBuf::from("/home/x"));
    }
}
