//! Host tool availability checks.

use crate::distro::{CommandSet, Family};

use super::types::CheckResult;

/// Check the account tools for this OS family are installed.
pub fn check_host_tools(commands: &CommandSet) -> Vec<CheckResult> {
    let package = match commands.family() {
        Family::Debian => "adduser/passwd",
        Family::Rhel => "shadow-utils",
    };

    commands
        .required_programs()
        .iter()
        .map(|tool| check_tool_exists(tool, package))
        .collect()
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, package: &str) -> CheckResult {
    match which::which(tool) {
        Ok(path) => CheckResult::pass_with(tool, &path.display().to_string()),
        Err(_) => CheckResult::fail(
            tool,
            &format!("Not found. Install the '{}' package.", package),
        ),
    }
}
