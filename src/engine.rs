//! The reconciliation engine.
//!
//! For every spec, one pass decides what the host must change:
//!
//! ```text
//! in realm, absent    -> Create, then field/group/key updates
//! in realm, present   -> field/group/key updates (possibly none)
//! out of realm        -> Delete, if present and not protected
//! ```
//!
//! Accounts are handled one at a time and each is read fresh from the host
//! right before it is diffed. Every step stands alone: a failed shell change
//! doesn't stop the group or key steps for the same account.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::account::{clean_path, AccountSpec};
use crate::distro::{CommandSet, Operation};
use crate::groups;
use crate::host::{AccountDatabase, SystemAccount};
use crate::loader::LoadFailure;
use crate::process::Runner;
use crate::realm::RealmFilter;
use crate::sshkeys::{self, KeyOwner};

/// Lowest uid the engine will modify or delete by default.
pub const DEFAULT_MIN_UID: u32 = 1000;

/// Everything a run needs to know about this host, built once at startup.
#[derive(Debug, Clone)]
pub struct Context {
    pub realm: RealmFilter,
    pub commands: CommandSet,
    /// Names never modified or deleted. Always contains `root`.
    pub protected: BTreeSet<String>,
    /// Accounts below this uid are system-reserved.
    pub min_uid: u32,
}

impl Context {
    pub fn new(realm: RealmFilter, commands: CommandSet) -> Self {
        Self {
            realm,
            commands,
            protected: BTreeSet::from(["root".to_string()]),
            min_uid: DEFAULT_MIN_UID,
        }
    }

    pub fn with_protected<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protected.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_min_uid(mut self, min_uid: u32) -> Self {
        self.min_uid = min_uid;
        self
    }

    fn is_protected_name(&self, username: &str) -> bool {
        self.protected.contains(username)
    }

    fn is_protected(&self, account: &SystemAccount) -> bool {
        self.is_protected_name(&account.username)
            || account.uid == 0
            || account.uid < self.min_uid
    }
}

/// One corrective step for an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create { home: PathBuf, shell: String },
    UpdatePassword(String),
    UpdateShell(String),
    UpdateHome(PathBuf),
    UpdateComment(String),
    UpdateGroups(Vec<String>),
    UpdateSshKeys(Vec<String>),
    Delete,
    NoOp,
}

impl Action {
    /// Whether this action changes anything on the host.
    pub fn is_corrective(&self) -> bool {
        !matches!(self, Action::NoOp)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create { home, shell } => write!(
                f,
                "create (home {}, shell {})",
                home.display(),
                shell
            ),
            Action::UpdatePassword(_) => write!(f, "update password"),
            Action::UpdateShell(shell) => write!(f, "update shell to {}", shell),
            Action::UpdateHome(home) => write!(f, "update home to {}", home.display()),
            Action::UpdateComment(comment) => write!(f, "update comment to '{}'", comment),
            Action::UpdateGroups(groups) => write!(f, "update groups to [{}]", groups.join(",")),
            Action::UpdateSshKeys(keys) => write!(f, "update ssh keys ({} keys)", keys.len()),
            Action::Delete => write!(f, "delete (with home directory)"),
            Action::NoOp => write!(f, "no changes"),
        }
    }
}

/// What happened to an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Applied,
    /// Dry run: would have been applied.
    Planned,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub action: Action,
    pub outcome: ActionOutcome,
}

/// Everything done (or attempted) for one account.
#[derive(Debug, Clone, Default)]
pub struct AccountReport {
    pub username: String,
    pub actions: Vec<ActionRecord>,
    pub warnings: Vec<String>,
}

impl AccountReport {
    fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            ..Default::default()
        }
    }

    fn record(&mut self, action: Action, outcome: ActionOutcome) {
        self.actions.push(ActionRecord { action, outcome });
    }

    fn warn(&mut self, message: String) {
        warn!("{}: {}", self.username, message);
        self.warnings.push(message);
    }

    pub fn failed(&self) -> bool {
        self.actions
            .iter()
            .any(|r| matches!(r.outcome, ActionOutcome::Failed(_)))
    }
}

/// Outcome of a whole reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub accounts: Vec<AccountReport>,
    pub load_failures: Vec<LoadFailure>,
}

impl RunReport {
    pub fn account(&self, username: &str) -> Option<&AccountReport> {
        self.accounts.iter().find(|a| a.username == username)
    }

    /// The actions emitted for one account, in order.
    pub fn actions_for(&self, username: &str) -> Vec<&Action> {
        self.account(username)
            .map(|a| a.actions.iter().map(|r| &r.action).collect())
            .unwrap_or_default()
    }

    /// Number of corrective actions attempted across all accounts.
    /// Skipped ones don't count.
    pub fn corrective_actions(&self) -> usize {
        self.accounts
            .iter()
            .flat_map(|a| &a.actions)
            .filter(|r| r.action.is_corrective() && !matches!(r.outcome, ActionOutcome::Skipped(_)))
            .count()
    }

    pub fn failed_accounts(&self) -> Vec<&str> {
        self.accounts
            .iter()
            .filter(|a| a.failed())
            .map(|a| a.username.as_str())
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        !self.load_failures.is_empty() || self.accounts.iter().any(AccountReport::failed)
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Reconciliation Report ===\n");

        for failure in &self.load_failures {
            println!("  ✗ [SKIP] {}: {}", failure.source, failure.error);
        }

        for account in &self.accounts {
            println!("  {}", account.username);
            for record in &account.actions {
                let (icon, status) = match &record.outcome {
                    ActionOutcome::Applied => ("✓", "DONE".to_string()),
                    ActionOutcome::Planned => ("→", "PLAN".to_string()),
                    ActionOutcome::Failed(e) => ("✗", format!("FAIL: {}", e)),
                    ActionOutcome::Skipped(why) => ("○", format!("SKIP: {}", why)),
                };
                println!("    {} {} [{}]", icon, record.action, status);
            }
            for warning in &account.warnings {
                println!("    ⚠ {}", warning);
            }
        }

        println!();
        println!(
            "Summary: {} accounts, {} corrective actions",
            self.accounts.len(),
            self.corrective_actions()
        );
        let failed = self.failed_accounts();
        if !failed.is_empty() {
            println!("         {} FAILED: {}", failed.len(), failed.join(", "));
        }
        if !self.load_failures.is_empty() {
            println!("         {} records skipped", self.load_failures.len());
        }
    }
}

/// Desired state after realm and group resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Desired {
    pub password: Option<String>,
    pub shell: String,
    pub home: PathBuf,
    /// Already sanitized.
    pub comment: String,
    /// Resolved, sorted, unique.
    pub groups: Vec<String>,
    /// Sorted, unique.
    pub ssh_keys: Vec<String>,
}

/// Current host state for one account. `None` means it couldn't be read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observed {
    pub password_hash: Option<String>,
    pub shell: Option<String>,
    pub home: Option<PathBuf>,
    pub comment: Option<String>,
    /// Supplementary groups: primary removed, sorted, unique.
    pub groups: Option<Vec<String>>,
    pub ssh_keys: Option<Vec<String>>,
}

impl Observed {
    /// State a freshly created account is expected to have. Used by dry runs,
    /// where nothing was actually created to read back.
    pub fn after_create(desired: &Desired) -> Self {
        Self {
            password_hash: Some(String::new()),
            shell: Some(desired.shell.clone()),
            home: Some(desired.home.clone()),
            comment: Some(String::new()),
            groups: Some(Vec::new()),
            ssh_keys: Some(Vec::new()),
        }
    }
}

/// Planned updates plus the fields that couldn't be compared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub actions: Vec<Action>,
    pub warnings: Vec<String>,
}

/// Diff desired against observed state. Pure.
///
/// Unreadable fields are skipped with a warning rather than guessed at.
pub fn plan_updates(desired: &Desired, observed: &Observed) -> Plan {
    let mut plan = Plan::default();

    if let Some(password) = &desired.password {
        match &observed.password_hash {
            Some(current) if current == password => {}
            Some(_) => plan.actions.push(Action::UpdatePassword(password.clone())),
            None => plan
                .warnings
                .push("can't read password hash, leaving password alone".to_string()),
        }
    }

    match &observed.shell {
        Some(current) if *current == desired.shell => {}
        Some(_) => plan.actions.push(Action::UpdateShell(desired.shell.clone())),
        None => plan.warnings.push("can't read shell, leaving it alone".to_string()),
    }

    match &observed.home {
        Some(current) if clean_path(current) == desired.home => {}
        Some(_) => plan.actions.push(Action::UpdateHome(desired.home.clone())),
        None => plan.warnings.push("can't read home directory, leaving it alone".to_string()),
    }

    match &observed.comment {
        Some(current) if current.trim() == desired.comment => {}
        Some(_) => plan.actions.push(Action::UpdateComment(desired.comment.clone())),
        None => plan.warnings.push("can't read comment, leaving it alone".to_string()),
    }

    match &observed.groups {
        Some(current) if *current == desired.groups => {}
        Some(_) => plan.actions.push(Action::UpdateGroups(desired.groups.clone())),
        None => plan.warnings.push("can't read group memberships, leaving them alone".to_string()),
    }

    match &observed.ssh_keys {
        Some(current) if sshkeys::keys_match(&desired.ssh_keys, current) => {}
        Some(_) => plan.actions.push(Action::UpdateSshKeys(desired.ssh_keys.clone())),
        None => plan.warnings.push("can't read authorized_keys, leaving it alone".to_string()),
    }

    plan
}

/// Drives reconciliation for one host.
pub struct Engine<'a> {
    ctx: &'a Context,
    db: &'a dyn AccountDatabase,
    runner: &'a mut dyn Runner,
    dry_run: bool,
}

impl<'a> Engine<'a> {
    pub fn new(ctx: &'a Context, db: &'a dyn AccountDatabase, runner: &'a mut dyn Runner) -> Self {
        Self {
            ctx,
            db,
            runner,
            dry_run: false,
        }
    }

    /// Plan only: read the host, execute nothing.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Reconcile every spec, in username order.
    ///
    /// Only accounts named by a spec are ever touched. If two specs share a
    /// username the first one wins.
    pub fn run(&mut self, specs: &[AccountSpec]) -> RunReport {
        let mut by_name: BTreeMap<&str, &AccountSpec> = BTreeMap::new();
        for spec in specs {
            by_name.entry(spec.username.as_str()).or_insert(spec);
        }

        info!(
            "Reconciling {} accounts for realm '{}' on {}",
            by_name.len(),
            self.ctx.realm.active(),
            self.ctx.commands.os_id()
        );

        let mut report = RunReport::default();
        for spec in by_name.into_values() {
            let account = if self.ctx.realm.matches(&spec.realms) {
                Some(self.reconcile_account(spec))
            } else {
                self.reconcile_removal(&spec.username)
            };
            report.accounts.extend(account);
        }

        info!(
            "Finished: {} corrective actions, {} accounts with failures",
            report.corrective_actions(),
            report.failed_accounts().len()
        );
        report
    }

    fn reconcile_account(&mut self, spec: &AccountSpec) -> AccountReport {
        let username = spec.username.as_str();
        let mut report = AccountReport::new(username);
        debug!("{} is meant to be in realm '{}'", username, self.ctx.realm.active());

        if self.ctx.is_protected_name(username) {
            report.record(Action::NoOp, ActionOutcome::Skipped("protected account".to_string()));
            return report;
        }

        let existing = match self.db.user(username) {
            Ok(existing) => existing,
            Err(e) => {
                report.warn(format!("can't look up account, skipping: {:#}", e));
                return report;
            }
        };

        let mut created = false;
        match existing {
            Some(account) if self.ctx.is_protected(&account) => {
                report.record(
                    Action::NoOp,
                    ActionOutcome::Skipped(format!("system-reserved account (uid {})", account.uid)),
                );
                return report;
            }
            Some(_) => {}
            None => {
                info!("Creating user: {}", username);
                let outcome = self.execute(Operation::AddUser {
                    username: username.to_string(),
                    home: spec.home.clone(),
                    shell: spec.shell.clone(),
                });
                let failed = matches!(outcome, ActionOutcome::Failed(_));
                report.record(
                    Action::Create {
                        home: spec.home.clone(),
                        shell: spec.shell.clone(),
                    },
                    outcome,
                );
                if failed {
                    return report;
                }
                created = true;
            }
        }

        let desired = self.desired(spec, &mut report);
        let observed = if created && self.dry_run {
            Observed::after_create(&desired)
        } else {
            self.observe(spec, &mut report)
        };

        let plan = plan_updates(&desired, &observed);
        for warning in plan.warnings {
            report.warn(warning);
        }
        for action in plan.actions {
            let outcome = self.apply(spec, &action);
            report.record(action, outcome);
        }

        if report.actions.is_empty() {
            debug!("{} is up to date", username);
            report.record(Action::NoOp, ActionOutcome::Skipped("up to date".to_string()));
        }
        report
    }

    fn reconcile_removal(&mut self, username: &str) -> Option<AccountReport> {
        let mut report = AccountReport::new(username);

        let account = match self.db.user(username) {
            Ok(Some(account)) => account,
            Ok(None) => return None,
            Err(e) => {
                report.warn(format!("can't look up account, not deleting: {:#}", e));
                return Some(report);
            }
        };

        if self.ctx.is_protected(&account) {
            report.record(
                Action::Delete,
                ActionOutcome::Skipped(format!("protected account (uid {})", account.uid)),
            );
            return Some(report);
        }

        info!("Deleting user: {}", username);
        let outcome = self.execute(Operation::DeleteUser {
            username: username.to_string(),
        });
        report.record(Action::Delete, outcome);
        Some(report)
    }

    fn desired(&self, spec: &AccountSpec, report: &mut AccountReport) -> Desired {
        let mut lookup_errors = Vec::new();
        let groups = groups::resolve(&spec.groups, &spec.username, &self.ctx.realm, |group| {
            match self.db.group_exists(group) {
                Ok(exists) => exists,
                Err(e) => {
                    lookup_errors.push(format!("can't check group '{}', dropping it: {:#}", group, e));
                    false
                }
            }
        });
        for message in lookup_errors {
            report.warn(message);
        }

        Desired {
            password: spec.password.clone(),
            shell: spec.shell.clone(),
            home: spec.home.clone(),
            comment: spec.gecos(),
            groups,
            ssh_keys: spec.ssh_keys.clone(),
        }
    }

    fn observe(&self, spec: &AccountSpec, report: &mut AccountReport) -> Observed {
        let username = spec.username.as_str();
        let mut observed = Observed::default();

        match self.db.user(username) {
            Ok(Some(account)) => {
                observed.shell = Some(account.shell);
                observed.home = Some(account.home);
                observed.comment = Some(account.comment);
            }
            Ok(None) => report.warn("account not found on re-read".to_string()),
            Err(e) => report.warn(format!("can't read account details: {:#}", e)),
        }

        if spec.password.is_some() {
            match self.db.password_hash(username) {
                Ok(Some(hash)) => observed.password_hash = Some(hash),
                // The planner reports the unreadable hash
                Ok(None) => debug!("{}: no shadow entry", username),
                Err(e) => debug!("{}: can't read shadow entry: {:#}", username, e),
            }
        }

        match self.db.user_groups(username) {
            Ok(groups) => observed.groups = Some(groups::normalize_memberships(groups, username)),
            Err(e) => report.warn(format!("can't read group memberships: {:#}", e)),
        }

        match sshkeys::read_keys(&spec.home) {
            Ok(keys) => observed.ssh_keys = Some(keys),
            Err(e) => report.warn(format!("can't read authorized_keys: {:#}", e)),
        }

        observed
    }

    fn apply(&mut self, spec: &AccountSpec, action: &Action) -> ActionOutcome {
        let username = spec.username.clone();
        match action {
            Action::UpdatePassword(password) => {
                info!("Updating password for {}", username);
                debug!("New password hash for {}: {}", username, password);
                self.execute(Operation::ChangePassword {
                    username,
                    password: password.clone(),
                })
            }
            Action::UpdateShell(shell) => {
                info!("Updating shell for {} to {}", username, shell);
                self.execute(Operation::ChangeShell {
                    username,
                    shell: shell.clone(),
                })
            }
            Action::UpdateHome(home) => {
                info!("Updating home dir for {} to {}", username, home.display());
                self.execute(Operation::ChangeHome {
                    username,
                    home: home.clone(),
                })
            }
            Action::UpdateComment(comment) => {
                info!("Updating comment for {} to '{}'", username, comment);
                self.execute(Operation::ChangeComment {
                    username,
                    comment: comment.clone(),
                })
            }
            Action::UpdateGroups(groups) => {
                info!("Updating user groups for {}: [{}]", username, groups.join(","));
                self.execute(Operation::ChangeGroups {
                    username,
                    groups: groups.clone(),
                })
            }
            Action::UpdateSshKeys(keys) => self.sync_keys(spec, keys),
            Action::Create { .. } | Action::Delete | Action::NoOp => {
                ActionOutcome::Skipped("not an update".to_string())
            }
        }
    }

    fn sync_keys(&mut self, spec: &AccountSpec, keys: &[String]) -> ActionOutcome {
        let username = spec.username.as_str();
        info!("Updating ssh keys for {} ({} keys)", username, keys.len());
        if self.dry_run {
            return ActionOutcome::Planned;
        }

        let owner = match self.db.user(username) {
            Ok(Some(account)) => KeyOwner {
                uid: account.uid,
                gid: account.gid,
            },
            Ok(None) => {
                return self.failed(
                    username,
                    "account not found, can't set key file owner".to_string(),
                )
            }
            Err(e) => {
                return self.failed(username, format!("can't determine key file owner: {:#}", e))
            }
        };

        match sshkeys::sync(username, &spec.home, keys, Some(owner)) {
            Ok(true) => ActionOutcome::Applied,
            Ok(false) => ActionOutcome::Skipped("already in sync".to_string()),
            Err(e) => self.failed(username, format!("{:#}", e)),
        }
    }

    fn execute(&mut self, operation: Operation) -> ActionOutcome {
        if self.dry_run {
            debug!("Would run {}", operation);
            return ActionOutcome::Planned;
        }

        let username = operation.username().to_string();
        let invocation = self.ctx.commands.invocation(operation);
        match self.runner.run(&invocation) {
            Ok(_) => ActionOutcome::Applied,
            Err(e) => self.failed(&username, format!("{:#}", e)),
        }
    }

    fn failed(&self, username: &str, message: String) -> ActionOutcome {
        error!("{}: {}", username, message);
        ActionOutcome::Failed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desired() -> Desired {
        Desired {
            password: Some("$6$new".to_string()),
            shell: "/bin/bash".to_string(),
            home: PathBuf::from("/home/alice"),
            comment: "Alice".to_string(),
            groups: vec!["adm".to_string(), "sudo".to_string()],
            ssh_keys: vec!["ssh-ed25519 AAA a".to_string()],
        }
    }

    fn matching() -> Observed {
        Observed {
            password_hash: Some("$6$new".to_string()),
            shell: Some("/bin/bash".to_string()),
            home: Some(PathBuf::from("/home/alice/")),
            comment: Some("Alice".to_string()),
            groups: Some(vec!["adm".to_string(), "sudo".to_string()]),
            ssh_keys: Some(vec!["ssh-ed25519 AAA a".to_string()]),
        }
    }

    #[test]
    fn test_plan_nothing_when_matching() {
        assert_eq!(plan_updates(&desired(), &matching()), Plan::default());
    }

    #[test]
    fn test_plan_each_field_independently() {
        let mut observed = matching();
        observed.shell = Some("/bin/sh".to_string());
        observed.comment = Some("Old Name".to_string());
        observed.groups = Some(vec!["adm".to_string()]);

        let plan = plan_updates(&desired(), &observed);
        assert_eq!(
            plan.actions,
            vec![
                Action::UpdateShell("/bin/bash".to_string()),
                Action::UpdateComment("Alice".to_string()),
                Action::UpdateGroups(vec!["adm".to_string(), "sudo".to_string()]),
            ]
        );
    }

    #[test]
    fn test_plan_skips_unreadable_fields() {
        let mut observed = matching();
        observed.password_hash = None;
        observed.ssh_keys = None;

        let plan = plan_updates(&desired(), &observed);
        assert!(plan.actions.is_empty());
        assert_eq!(plan.warnings.len(), 2);
    }

    #[test]
    fn test_plan_unmanaged_password() {
        let mut d = desired();
        d.password = None;
        let mut observed = matching();
        observed.password_hash = None;

        let plan = plan_updates(&d, &observed);
        assert!(plan.actions.is_empty());
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_plan_after_create() {
        let d = desired();
        let plan = plan_updates(&d, &Observed::after_create(&d));
        assert_eq!(
            plan.actions,
            vec![
                Action::UpdatePassword("$6$new".to_string()),
                Action::UpdateComment("Alice".to_string()),
                Action::UpdateGroups(vec!["adm".to_string(), "sudo".to_string()]),
                Action::UpdateSshKeys(vec!["ssh-ed25519 AAA a".to_string()]),
            ]
        );
    }

    #[test]
    fn test_action_display_hides_password() {
        let shown = Action::UpdatePassword("$6$secret".to_string()).to_string();
        assert!(!shown.contains("secret"));
    }
}
