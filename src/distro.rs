//! OS-specific account management commands.
//!
//! The engine talks in [`Operation`]s. A [`CommandSet`] selected once at
//! startup turns each operation into the argv for the detected distribution
//! family. Nothing outside this module branches on the OS.

use anyhow::{bail, Result};
use std::fmt;
use std::path::PathBuf;

/// Distribution lineage that decides the account tool syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// `adduser`/`deluser` wrappers (Debian, Ubuntu).
    Debian,
    /// shadow-utils directly (CentOS, RHEL, Rocky, Fedora).
    Rhel,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Debian => write!(f, "debian"),
            Family::Rhel => write!(f, "rhel"),
        }
    }
}

/// Strategy table keyed by normalized `id:version` or bare `id`.
const OS_TABLE: &[(&str, Family)] = &[
    ("debian", Family::Debian),
    ("debian:8", Family::Debian),
    ("debian:9", Family::Debian),
    ("debian:10", Family::Debian),
    ("debian:11", Family::Debian),
    ("debian:12", Family::Debian),
    ("ubuntu", Family::Debian),
    ("ubuntu:16.04", Family::Debian),
    ("ubuntu:18.04", Family::Debian),
    ("ubuntu:18.10", Family::Debian),
    ("ubuntu:19.04", Family::Debian),
    ("ubuntu:20.04", Family::Debian),
    ("ubuntu:22.04", Family::Debian),
    ("ubuntu:24.04", Family::Debian),
    ("centos", Family::Rhel),
    ("centos:7", Family::Rhel),
    ("centos:7.4", Family::Rhel),
    ("centos:7.5", Family::Rhel),
    ("centos:7.6", Family::Rhel),
    ("rhel", Family::Rhel),
    ("rhel:8", Family::Rhel),
    ("rhel:9", Family::Rhel),
    ("rocky", Family::Rhel),
    ("rocky:8", Family::Rhel),
    ("rocky:9", Family::Rhel),
    ("almalinux", Family::Rhel),
    ("almalinux:8", Family::Rhel),
    ("almalinux:9", Family::Rhel),
    ("fedora", Family::Rhel),
];

/// A logical account change, independent of the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    AddUser {
        username: String,
        home: PathBuf,
        shell: String,
    },
    DeleteUser {
        username: String,
    },
    ChangeShell {
        username: String,
        shell: String,
    },
    ChangePassword {
        username: String,
        password: String,
    },
    ChangeHome {
        username: String,
        home: PathBuf,
    },
    ChangeGroups {
        username: String,
        groups: Vec<String>,
    },
    ChangeComment {
        username: String,
        comment: String,
    },
}

impl Operation {
    /// The account this operation acts on.
    pub fn username(&self) -> &str {
        match self {
            Operation::AddUser { username, .. }
            | Operation::DeleteUser { username }
            | Operation::ChangeShell { username, .. }
            | Operation::ChangePassword { username, .. }
            | Operation::ChangeHome { username, .. }
            | Operation::ChangeGroups { username, .. }
            | Operation::ChangeComment { username, .. } => username,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Operation::AddUser { .. } => "add-user",
            Operation::DeleteUser { .. } => "delete-user",
            Operation::ChangeShell { .. } => "change-shell",
            Operation::ChangePassword { .. } => "change-password",
            Operation::ChangeHome { .. } => "change-home",
            Operation::ChangeGroups { .. } => "change-groups",
            Operation::ChangeComment { .. } => "change-comment",
        }
    }
}

// Never prints the payload: ChangePassword carries a hash.
impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verb(), self.username())
    }
}

/// A concrete argv for one operation. Executed directly, never via a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub operation: Operation,
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    fn new(operation: Operation, program: &str, args: Vec<String>) -> Self {
        Self {
            operation,
            program: program.to_string(),
            args,
        }
    }
}

/// The account commands for one OS family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSet {
    os_id: String,
    family: Family,
}

impl CommandSet {
    /// Select the command set for an OS identifier like `debian:11`.
    ///
    /// Tries the full `id:version` key first, then the bare `id`. An
    /// unknown identifier is an error.
    pub fn for_os(os_id: &str) -> Result<Self> {
        let normalized = normalize_os_id(os_id);
        if normalized.is_empty() {
            bail!("Unable to detect operating system (empty OS identifier)");
        }

        let bare = normalized.split(':').next().unwrap_or_default();
        let family = lookup(&normalized).or_else(|| lookup(bare));

        match family {
            Some(family) => Ok(Self {
                os_id: normalized,
                family,
            }),
            None => bail!(
                "No account commands configured for operating system '{}'.\n\
                 Supported: {}",
                normalized,
                supported_ids().join(", ")
            ),
        }
    }

    /// The normalized identifier this set was selected for.
    pub fn os_id(&self) -> &str {
        &self.os_id
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Programs that must be on PATH for this family.
    pub fn required_programs(&self) -> &'static [&'static str] {
        match self.family {
            Family::Debian => &["adduser", "deluser", "usermod", "getent", "id"],
            Family::Rhel => &["adduser", "userdel", "usermod", "getent", "id"],
        }
    }

    /// Resolve an operation to its concrete invocation.
    pub fn invocation(&self, operation: Operation) -> Invocation {
        let args: Vec<String> = match (&operation, self.family) {
            (Operation::AddUser { username, home, shell }, Family::Debian) => vec![
                "--home".into(),
                home.display().to_string(),
                "--shell".into(),
                shell.clone(),
                "--gecos".into(),
                String::new(),
                "--disabled-password".into(),
                username.clone(),
            ],
            (Operation::AddUser { username, home, shell }, Family::Rhel) => vec![
                "-m".into(),
                "--home-dir".into(),
                home.display().to_string(),
                "--shell".into(),
                shell.clone(),
                username.clone(),
            ],
            (Operation::DeleteUser { username }, Family::Debian) => {
                vec!["--remove-home".into(), username.clone()]
            }
            (Operation::DeleteUser { username }, Family::Rhel) => {
                vec!["--remove".into(), "-f".into(), username.clone()]
            }
            (Operation::ChangeShell { username, shell }, _) => {
                vec!["--shell".into(), shell.clone(), username.clone()]
            }
            (Operation::ChangePassword { username, password }, _) => {
                vec!["--password".into(), password.clone(), username.clone()]
            }
            (Operation::ChangeHome { username, home }, _) => vec![
                "--move-home".into(),
                "--home".into(),
                home.display().to_string(),
                username.clone(),
            ],
            (Operation::ChangeGroups { username, groups }, _) => {
                vec!["--groups".into(), groups.join(","), username.clone()]
            }
            (Operation::ChangeComment { username, comment }, _) => {
                vec!["--comment".into(), comment.clone(), username.clone()]
            }
        };

        let program = match (&operation, self.family) {
            (Operation::AddUser { .. }, _) => "adduser",
            (Operation::DeleteUser { .. }, Family::Debian) => "deluser",
            (Operation::DeleteUser { .. }, Family::Rhel) => "userdel",
            _ => "usermod",
        };

        Invocation::new(operation, program, args)
    }
}

fn lookup(key: &str) -> Option<Family> {
    OS_TABLE
        .iter()
        .find(|(id, _)| *id == key)
        .map(|(_, family)| *family)
}

fn supported_ids() -> Vec<&'static str> {
    OS_TABLE.iter().map(|(id, _)| *id).collect()
}

fn normalize_os_id(os_id: &str) -> String {
    os_id
        .trim()
        .chars()
        .filter(|c| *c != '"' && *c != '\'')
        .collect::<String>()
        .to_lowercase()
}

/// Build the `id:version` key from `/etc/os-release` content.
///
/// Returns `ID:VERSION_ID` when both are present, `ID` alone when there is
/// no version, and `None` when there is no `ID`.
pub fn detect_os_id(os_release: &str) -> Option<String> {
    let mut id = None;
    let mut version_id = None;

    for line in os_release.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "ID" => id = Some(value.to_string()),
            "VERSION_ID" => version_id = Some(value.to_string()),
            _ => {}
        }
    }

    match (id, version_id) {
        (Some(id), Some(version)) => Some(format!("{}:{}", id, version)),
        (Some(id), None) => Some(id),
        (None, _) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_version_match() {
        let set = CommandSet::for_os("debian:11").unwrap();
        assert_eq!(set.family(), Family::Debian);
        assert_eq!(set.os_id(), "debian:11");

        let set = CommandSet::for_os("centos:7.6").unwrap();
        assert_eq!(set.family(), Family::Rhel);
    }

    #[test]
    fn test_bare_id_fallback() {
        // Unknown version falls back to the bare family entry
        let set = CommandSet::for_os("debian:13").unwrap();
        assert_eq!(set.family(), Family::Debian);

        let set = CommandSet::for_os("ubuntu").unwrap();
        assert_eq!(set.family(), Family::Debian);
    }

    #[test]
    fn test_normalization() {
        let set = CommandSet::for_os("  \"Ubuntu:22.04\" ").unwrap();
        assert_eq!(set.os_id(), "ubuntu:22.04");
    }

    #[test]
    fn test_unknown_os_is_error() {
        let err = CommandSet::for_os("plan9:4").unwrap_err();
        assert!(err.to_string().contains("plan9:4"));
        assert!(CommandSet::for_os("").is_err());
    }

    #[test]
    fn test_debian_add_and_delete() {
        let set = CommandSet::for_os("debian").unwrap();
        let inv = set.invocation(Operation::AddUser {
            username: "alice".into(),
            home: PathBuf::from("/home/alice"),
            shell: "/bin/bash".into(),
        });
        assert_eq!(inv.program, "adduser");
        assert_eq!(
            inv.args,
            vec![
                "--home",
                "/home/alice",
                "--shell",
                "/bin/bash",
                "--gecos",
                "",
                "--disabled-password",
                "alice"
            ]
        );

        let inv = set.invocation(Operation::DeleteUser {
            username: "alice".into(),
        });
        assert_eq!(inv.program, "deluser");
        assert_eq!(inv.args, vec!["--remove-home", "alice"]);
    }

    #[test]
    fn test_rhel_add_and_delete() {
        let set = CommandSet::for_os("centos:7").unwrap();
        let inv = set.invocation(Operation::AddUser {
            username: "bob".into(),
            home: PathBuf::from("/srv/bob"),
            shell: "/bin/zsh".into(),
        });
        assert_eq!(inv.program, "adduser");
        assert_eq!(
            inv.args,
            vec!["-m", "--home-dir", "/srv/bob", "--shell", "/bin/zsh", "bob"]
        );

        let inv = set.invocation(Operation::DeleteUser {
            username: "bob".into(),
        });
        assert_eq!(inv.program, "userdel");
        assert_eq!(inv.args, vec!["--remove", "-f", "bob"]);
    }

    #[test]
    fn test_usermod_variants_shared() {
        for os in ["debian:9", "rocky:9"] {
            let set = CommandSet::for_os(os).unwrap();
            let inv = set.invocation(Operation::ChangeGroups {
                username: "carol".into(),
                groups: vec!["adm".into(), "sudo".into()],
            });
            assert_eq!(inv.program, "usermod");
            assert_eq!(inv.args, vec!["--groups", "adm,sudo", "carol"]);

            let inv = set.invocation(Operation::ChangeHome {
                username: "carol".into(),
                home: PathBuf::from("/data/carol"),
            });
            assert_eq!(inv.args, vec!["--move-home", "--home", "/data/carol", "carol"]);
        }
    }

    #[test]
    fn test_operation_display_hides_password() {
        let op = Operation::ChangePassword {
            username: "dave".into(),
            password: "$6$abc".into(),
        };
        assert_eq!(op.to_string(), "change-password dave");
    }

    #[test]
    fn test_detect_os_id() {
        let debian = "PRETTY_NAME=\"Debian GNU/Linux 11 (bullseye)\"\nNAME=\"Debian GNU/Linux\"\nVERSION_ID=\"11\"\nID=debian\n";
        assert_eq!(detect_os_id(debian).as_deref(), Some("debian:11"));

        let arch = "NAME=\"Arch Linux\"\nID=arch\nBUILD_ID=rolling\n";
        assert_eq!(detect_os_id(arch).as_deref(), Some("arch"));

        assert_eq!(detect_os_id("NAME=nothing\n"), None);
    }
}
