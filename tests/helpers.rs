//! Shared test utilities for userd tests.
#![allow(dead_code)]

use anyhow::{bail, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

use userd::account::AccountSpec;
use userd::distro::{CommandSet, Invocation, Operation};
use userd::engine::{Context, Engine, RunReport};
use userd::host::{AccountDatabase, SystemAccount};
use userd::process::Runner;
use userd::realm::{RealmFilter, RealmMatching};

/// Test environment with a temporary directory holding every home.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Parent of all test homes
    pub homes: PathBuf,
    /// Accounts repository checkout
    pub repo: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let homes = temp_dir.path().join("home");
        let repo = temp_dir.path().join("accounts");
        fs::create_dir_all(&homes).expect("Failed to create home dir");
        fs::create_dir_all(&repo).expect("Failed to create repo dir");

        Self {
            _temp_dir: temp_dir,
            homes,
            repo,
        }
    }

    pub fn home(&self, username: &str) -> PathBuf {
        self.homes.join(username)
    }

    /// Parse a spec, pointing its home into the temp dir unless the JSON
    /// names one.
    pub fn spec(&self, json: &str) -> AccountSpec {
        let mut value: serde_json::Value = serde_json::from_str(json).expect("bad test JSON");
        if value.get("home").is_none() {
            let username = value["username"].as_str().expect("test spec needs a username");
            value["home"] = serde_json::Value::String(self.home(username).display().to_string());
        }
        AccountSpec::from_json(value.to_string().as_bytes()).expect("test spec should parse")
    }

    /// Write a record into the repo checkout.
    pub fn write_record(&self, relative: &str, content: &str) {
        let path = self.repo.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create record dir");
        }
        fs::write(path, content).expect("Failed to write record");
    }

    pub fn authorized_keys(&self, username: &str) -> Option<String> {
        fs::read_to_string(self.home(username).join(".ssh/authorized_keys")).ok()
    }
}

/// Engine context for a Debian host in `realm`.
///
/// Created accounts get the test process's own uid (see [`FakeHost`]), so
/// the uid floor is lowered to keep them manageable.
pub fn context(realm: &str) -> Context {
    context_with(realm, RealmMatching::Glob)
}

pub fn context_with(realm: &str, mode: RealmMatching) -> Context {
    let commands = CommandSet::for_os("debian:12").expect("debian is supported");
    Context::new(RealmFilter::new(realm, mode), commands).with_min_uid(1)
}

/// Run one reconciliation pass against the fake host.
pub fn run(ctx: &Context, host: &FakeHost, specs: &[AccountSpec]) -> RunReport {
    let mut runner = host.clone();
    Engine::new(ctx, host, &mut runner).run(specs)
}

pub fn run_dry(ctx: &Context, host: &FakeHost, specs: &[AccountSpec]) -> RunReport {
    let mut runner = host.clone();
    Engine::new(ctx, host, &mut runner).dry_run(true).run(specs)
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub users: BTreeMap<String, SystemAccount>,
    pub shadow: BTreeMap<String, String>,
    pub groups: BTreeSet<String>,
    /// Supplementary memberships per user.
    pub memberships: BTreeMap<String, Vec<String>>,
    /// Every operation the runner was asked to perform.
    pub log: Vec<Operation>,
    /// Operations (as displayed, e.g. "change-shell alice") that fail.
    pub failing: BTreeSet<String>,
    /// Users whose lookup fails.
    pub unreadable: BTreeSet<String>,
    /// Users with no shadow entry.
    pub no_shadow: BTreeSet<String>,
}

/// In-memory host. Clones share state, so one can serve as the database
/// while another is the runner.
#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    pub state: Rc<RefCell<FakeState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        let host = Self::default();
        host.add_group("root");
        host.insert_user(SystemAccount {
            username: "root".to_string(),
            password: "x".to_string(),
            uid: 0,
            gid: 0,
            comment: "root".to_string(),
            home: PathBuf::from("/root"),
            shell: "/bin/bash".to_string(),
        });
        host
    }

    pub fn add_group(&self, group: &str) {
        self.state.borrow_mut().groups.insert(group.to_string());
    }

    pub fn insert_user(&self, account: SystemAccount) {
        let mut state = self.state.borrow_mut();
        state.groups.insert(account.username.clone());
        state.users.insert(account.username.clone(), account);
    }

    /// Add an ordinary account with the test process's uid.
    pub fn add_user(&self, username: &str, home: &Path, shell: &str) {
        let (uid, gid) = own_ids();
        self.insert_user(SystemAccount {
            username: username.to_string(),
            password: "x".to_string(),
            uid,
            gid,
            comment: String::new(),
            home: home.to_path_buf(),
            shell: shell.to_string(),
        });
    }

    pub fn set_memberships(&self, username: &str, groups: &[&str]) {
        self.state
            .borrow_mut()
            .memberships
            .insert(username.to_string(), groups.iter().map(|g| g.to_string()).collect());
    }

    pub fn fail_operation(&self, displayed: &str) {
        self.state.borrow_mut().failing.insert(displayed.to_string());
    }

    pub fn make_unreadable(&self, username: &str) {
        self.state.borrow_mut().unreadable.insert(username.to_string());
    }

    pub fn drop_shadow(&self, username: &str) {
        self.state.borrow_mut().no_shadow.insert(username.to_string());
    }

    pub fn has_user(&self, username: &str) -> bool {
        self.state.borrow().users.contains_key(username)
    }

    pub fn account(&self, username: &str) -> Option<SystemAccount> {
        self.state.borrow().users.get(username).cloned()
    }

    pub fn memberships(&self, username: &str) -> Vec<String> {
        self.state
            .borrow()
            .memberships
            .get(username)
            .cloned()
            .unwrap_or_default()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.state.borrow().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.borrow_mut().log.clear();
    }
}

/// uid/gid of the test process. Key files get chowned to the account's
/// ids, which only works for other ids when running as root.
pub fn own_ids() -> (u32, u32) {
    // SAFETY: getuid/getgid cannot fail
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    if uid == 0 {
        (2000, 2000)
    } else {
        (uid, gid)
    }
}

impl AccountDatabase for FakeHost {
    fn user(&self, username: &str) -> Result<Option<SystemAccount>> {
        let state = self.state.borrow();
        if state.unreadable.contains(username) {
            bail!("getent passwd {} failed (exit code 1): NSS unavailable", username);
        }
        Ok(state.users.get(username).cloned())
    }

    fn password_hash(&self, username: &str) -> Result<Option<String>> {
        let state = self.state.borrow();
        if state.no_shadow.contains(username) {
            return Ok(None);
        }
        Ok(state.users.get(username).map(|_| {
            state.shadow.get(username).cloned().unwrap_or_else(|| "!".to_string())
        }))
    }

    fn group_exists(&self, group: &str) -> Result<bool> {
        Ok(self.state.borrow().groups.contains(group))
    }

    fn user_groups(&self, username: &str) -> Result<Vec<String>> {
        let state = self.state.borrow();
        if !state.users.contains_key(username) {
            bail!("id: '{}': no such user", username);
        }
        let mut groups = vec![username.to_string()];
        groups.extend(state.memberships.get(username).cloned().unwrap_or_default());
        Ok(groups)
    }
}

impl Runner for FakeHost {
    fn run(&mut self, invocation: &Invocation) -> Result<String> {
        let operation = invocation.operation.clone();
        let displayed = operation.to_string();
        self.state.borrow_mut().log.push(operation.clone());

        if self.state.borrow().failing.contains(&displayed) {
            bail!("{} ({}) failed (exit code 1): simulated failure", displayed, invocation.program);
        }

        match operation {
            Operation::AddUser { username, home, shell } => {
                if self.has_user(&username) {
                    bail!("adduser: The user `{}' already exists.", username);
                }
                fs::create_dir_all(&home)?;
                self.add_user(&username, &home, &shell);
            }
            Operation::DeleteUser { username } => {
                let mut state = self.state.borrow_mut();
                let Some(account) = state.users.remove(&username) else {
                    bail!("deluser: The user `{}' does not exist.", username);
                };
                state.shadow.remove(&username);
                state.memberships.remove(&username);
                if account.home.exists() {
                    fs::remove_dir_all(&account.home)?;
                }
            }
            Operation::ChangeShell { username, shell } => {
                self.with_account(&username, |a| a.shell = shell)?;
            }
            Operation::ChangePassword { username, password } => {
                self.with_account(&username, |_| {})?;
                self.state.borrow_mut().shadow.insert(username, password);
            }
            Operation::ChangeHome { username, home } => {
                let old = self.account(&username).map(|a| a.home);
                if let Some(old) = old.filter(|old| old.exists()) {
                    fs::rename(old, &home)?;
                }
                self.with_account(&username, |a| a.home = home)?;
            }
            Operation::ChangeGroups { username, groups } => {
                self.with_account(&username, |_| {})?;
                self.state.borrow_mut().memberships.insert(username, groups);
            }
            Operation::ChangeComment { username, comment } => {
                self.with_account(&username, |a| a.comment = comment)?;
            }
        }
        Ok(String::new())
    }
}

impl FakeHost {
    fn with_account<F: FnOnce(&mut SystemAccount)>(&self, username: &str, f: F) -> Result<()> {
        match self.state.borrow_mut().users.get_mut(username) {
            Some(account) => {
                f(account);
                Ok(())
            }
            None => bail!("usermod: user '{}' does not exist", username),
        }
    }
}
