//! ---
//! fabric_section: "06-collaborator-adapters"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Host command execution with bounded runtime and canned replies."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tokio::time;
use tracing::debug;

const LOG_TARGET: &str = "fabric::adapters::runner";

/// One command line, with any namespace prefix already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Run `program args...` through `prefix` (for example `ip netns exec bgp1`).
    pub fn with_prefix(self, prefix: &[String]) -> Self {
        match prefix.split_first() {
            None => self,
            Some((program, rest)) => {
                let mut args = rest.to_vec();
                args.push(self.program);
                args.extend(self.args);
                Self {
                    program: program.clone(),
                    args,
                }
            }
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout of a successful run, or an error carrying stderr.
    pub fn into_stdout(self, line: &CommandLine) -> Result<String> {
        if self.is_success() {
            return Ok(self.stdout);
        }
        let status = self
            .status
            .map_or_else(|| "signal".to_owned(), |code| code.to_string());
        bail!("`{line}` exited with {status}: {}", self.stderr.trim())
    }
}

/// Executes host commands. Implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait CommandRunner: Send + Sync + 'static {
    async fn run(&self, line: &CommandLine, timeout: Duration) -> Result<CommandOutput>;
}

/// Spawns real processes with `tokio::process`. A process outliving its timeout is killed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, line: &CommandLine, timeout: Duration) -> Result<CommandOutput> {
        debug!(target: LOG_TARGET, command = %line, "running host command");
        let child = Command::new(&line.program)
            .args(&line.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn `{line}`"))?;
        let output = time::timeout(timeout, child.wait_with_output())
            .await
            .with_context(|| format!("`{line}` timed out after {} ms", timeout.as_millis()))?
            .with_context(|| format!("failed to wait for `{line}`"))?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Replays canned output keyed by a substring of the rendered command line, and records
/// every command it was asked to run.
///
/// Commands matching no rule succeed with empty output.
#[derive(Debug, Default)]
pub struct CannedRunner {
    rules: Mutex<Vec<(String, CommandOutput)>>,
    history: Mutex<Vec<CommandLine>>,
}

impl CannedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later rules win over earlier ones for the same command.
    pub fn respond(&self, pattern: &str, output: CommandOutput) {
        self.rules.lock().push((pattern.to_owned(), output));
    }

    pub fn history(&self) -> Vec<CommandLine> {
        self.history.lock().clone()
    }

    /// Rendered command lines, in order.
    pub fn rendered(&self) -> Vec<String> {
        self.history.lock().iter().map(ToString::to_string).collect()
    }
}

#[async_trait]
impl CommandRunner for CannedRunner {
    async fn run(&self, line: &CommandLine, _timeout: Duration) -> Result<CommandOutput> {
        self.history.lock().push(line.clone());
        let rendered = line.to_string();
        let rules = self.rules.lock();
        Ok(rules
            .iter()
            .rev()
            .find(|(pattern, _)| rendered.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::success("")))
    }
}
