//! Centralized command execution with consistent error handling.
//!
//! Every external program `userd` touches goes through [`Cmd`], so every
//! invocation has its exit status checked and its output captured. The
//! [`Runner`] trait is the seam the engine uses to realize account changes,
//! which lets tests swap the host out for an in-memory fake.

use anyhow::{bail, Context, Result};
use std::process::{Command, ExitStatus, Stdio};

use crate::distro::Invocation;

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }

    /// Whatever the command had to say: stderr if present, else stdout.
    pub fn diagnostic(&self) -> &str {
        match self.stderr_trimmed() {
            "" => self.stdout_trimmed(),
            stderr => stderr,
        }
    }
}

/// Builder for configuring command execution.
///
/// Children always get a null stdin, so a tool that wants to prompt
/// (`adduser` asking for finger information) fails instead of hanging.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            allow_fail: false,
            error_prefix: None,
        }
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// Run the command and capture output.
    ///
    /// Blocks until the child exits. There is no timeout: a hung account
    /// utility stalls the whole run.
    pub fn run(self) -> Result<CommandResult> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            let prefix = self
                .error_prefix
                .unwrap_or_else(|| format!("'{}' failed", self.program));

            let detail = result.diagnostic();
            if detail.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), detail);
            }
        }

        Ok(result)
    }
}

/// Executes account-management invocations.
pub trait Runner {
    /// Run one invocation to completion, returning its output on success.
    fn run(&mut self, invocation: &Invocation) -> Result<String>;
}

/// Runs invocations on the real host.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<String> {
        // The prefix names the operation, never the argv, so password
        // hashes stay out of error messages.
        let result = Cmd::new(&invocation.program)
            .args(&invocation.args)
            .error_msg(format!("{} ({})", invocation.operation, invocation.program))
            .run()?;
        Ok(result.diagnostic().to_string())
    }
}

/// Check that every program is on PATH.
pub fn ensure_programs<'a, I>(programs: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let missing: Vec<&str> = programs
        .into_iter()
        .filter(|p| which::which(p).is_err())
        .collect();
    if !missing.is_empty() {
        bail!("Required commands not found in PATH: {}", missing.join(", "));
    }
    Ok(())
}
