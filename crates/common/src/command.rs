//! Shell command execution
//!
//! Every external tool the harness drives (ssh-keygen, genisoimage, ssh,
//! ansible-playbook) is started through a [`CommandRunner`]. Commands run under
//! `sh -c` with a bounded timeout; any non-zero exit status is a failure.
//! Each command gets its own process group so a timeout stops everything the
//! shell started.

use std::collections::BTreeMap;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Timeout applied when the caller does not pick one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A command to run, either as a ready shell line or as discrete arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Passed to the shell untouched
    Shell(String),
    /// Each argument is quoted before joining
    Argv(Vec<String>),
}

impl CommandLine {
    pub fn shell(line: impl Into<String>) -> Self {
        CommandLine::Shell(line.into())
    }

    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandLine::Argv(args.into_iter().map(Into::into).collect())
    }

    /// Render the command as a single line for `sh -c`
    pub fn to_shell(&self) -> String {
        match self {
            CommandLine::Shell(line) => line.clone(),
            CommandLine::Argv(args) => args
                .iter()
                .map(|arg| quote(arg))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// First word of the command, used to tell recorded calls apart
    pub fn program(&self) -> Option<&str> {
        match self {
            CommandLine::Shell(line) => line.split_whitespace().next(),
            CommandLine::Argv(args) => args.first().map(String::as_str),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell())
    }
}

impl From<&str> for CommandLine {
    fn from(line: &str) -> Self {
        CommandLine::Shell(line.to_string())
    }
}

impl From<String> for CommandLine {
    fn from(line: String) -> Self {
        CommandLine::Shell(line)
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(args: Vec<String>) -> Self {
        CommandLine::Argv(args)
    }
}

/// Quote a single argument so the shell reads it back as one token
pub fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./:,@+%".contains(&b));
    if plain {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Outcome of a finished command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Exit status, -1 when the process was killed by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    fn last_stderr_line(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
    }
}

/// A command ran and exited non-zero
#[derive(Error, Debug, Clone)]
#[error("Command `{command}` failed with exit status {}: {}", .result.exit_code, .result.last_stderr_line())]
pub struct CommandError {
    pub command: String,
    pub result: RunResult,
}

/// Receives command failures the caller asked to have reported
pub trait DiagnosticSink: Send + Sync {
    fn command_failed(&self, error: &CommandError);

    fn command_timed_out(&self, _command: &str, _timeout: Duration) {}
}

/// Discards every report
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn command_failed(&self, _error: &CommandError) {}
}

/// Forwards reports to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn command_failed(&self, err: &CommandError) {
        error!(
            command = %err.command,
            exit_code = err.result.exit_code,
            stdout = %err.result.stdout,
            stderr = %err.result.stderr,
            "command failed"
        );
    }

    fn command_timed_out(&self, command: &str, timeout: Duration) {
        error!(command = %command, timeout_secs = timeout.as_secs(), "command timed out");
    }
}

/// Per-call execution options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub timeout: Duration,
    /// Added on top of the inherited environment
    pub env: BTreeMap<String, String>,
    /// Report failures to the runner's sink
    pub log_on_error: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            env: BTreeMap::new(),
            log_on_error: true,
        }
    }
}

impl RunOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn log_on_error(mut self, log_on_error: bool) -> Self {
        self.log_on_error = log_on_error;
        self
    }
}

/// Executes commands and returns their stdout
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &CommandLine, options: &RunOptions) -> Result<String>;
}

/// Runs commands as local `sh -c` processes
#[derive(Clone)]
pub struct ShellRunner {
    sink: Arc<dyn DiagnosticSink>,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellRunner {
    /// Runner that reports nothing
    pub fn new() -> Self {
        Self::with_sink(Arc::new(NoopSink))
    }

    pub fn with_sink(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &CommandLine, options: &RunOptions) -> Result<String> {
        let line = command.to_shell();
        debug!("Running: {}", line);

        let child = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0)
            .spawn()
            .map_err(|source| Error::Spawn {
                command: line.clone(),
                source,
            })?;
        let group = child.id();

        // Dropping the wait future on timeout drops the child, which kills the
        // shell; the rest of its process group is killed explicitly.
        let output = match tokio::time::timeout(options.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                if let Some(group) = group {
                    if let Err(e) = killpg(Pid::from_raw(group as i32), Signal::SIGKILL) {
                        debug!("Killing process group {} failed: {}", group, e);
                    }
                }
                if options.log_on_error {
                    self.sink.command_timed_out(&line, options.timeout);
                }
                return Err(Error::Timeout {
                    command: line,
                    seconds: options.timeout.as_secs(),
                });
            }
        };

        let result = RunResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() {
            let err = CommandError {
                command: line,
                result,
            };
            if options.log_on_error {
                self.sink.command_failed(&err);
            }
            return Err(err.into());
        }

        Ok(result.stdout)
    }
}
