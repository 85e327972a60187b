//! Core data models for sshfan

use crate::error::{ExecError, Result, SshfanError};
use std::fmt;
use std::time::Duration;

// Run defaults
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_DEADLINE_SECS: u64 = 120;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
pub const DEFAULT_MAX_PARALLEL: usize = 64;

// Input and output limits
pub const MAX_COMMAND_LEN: usize = 4_096; // 4 KB
pub const MAX_OUTPUT_SIZE: usize = 10_485_760; // 10 MB

// Pseudo-terminal request
pub const PTY_TERM: &str = "xterm";
pub const PTY_COLUMNS: u32 = 80;
pub const PTY_ROWS: u32 = 40;
pub const PTY_BAUD: u32 = 14_400;

/// Prefix that makes the remote side print its own hostname first
pub const HOSTNAME_ECHO_PREFIX: &str = "echo \"### HOSTNAME $(hostname) ###\n\n\";";

/// Process exit statuses
pub const EXIT_OK: i32 = 0;
pub const EXIT_INTERNAL: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_HOST_FAILED: i32 = 3;
pub const EXIT_TIMED_OUT: i32 = 4;

/// One remote host the command is run against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target(String);

impl Target {
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Target {
    fn from(host: &str) -> Self {
        Self::new(host)
    }
}

/// Split a whitespace-separated host list, keeping order and duplicates
pub fn parse_targets(list: &str) -> Vec<Target> {
    list.split_whitespace().map(Target::from).collect()
}

/// Validate a command and optionally prepend the hostname echo
pub fn prepare_command(command: &str, hostname_echo: bool) -> Result<String> {
    if command.trim().is_empty() {
        return Err(SshfanError::Usage("command cannot be empty".to_string()));
    }

    let prepared = if hostname_echo {
        format!("{}{}", HOSTNAME_ECHO_PREFIX, command)
    } else {
        command.to_string()
    };

    if prepared.len() > MAX_COMMAND_LEN {
        return Err(SshfanError::CommandTooLong {
            limit: MAX_COMMAND_LEN,
        });
    }

    Ok(prepared)
}

/// Output of one completed remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: Vec<u8>,
    pub exit_status: i32,
    pub output_truncated: bool, // True if stdout exceeded MAX_OUTPUT_SIZE
}

/// Tagged per-host outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(ExecError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Result published by an executor task, exactly one per target entry
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub target: Target,
    pub output: Vec<u8>,
    pub outcome: Outcome,
    pub duration: Duration,
    /// Output was cut at MAX_OUTPUT_SIZE
    pub truncated: bool,
}

impl ExecutionResult {
    /// Build a result from what the session client returned
    pub fn from_session(
        target: Target,
        session: std::result::Result<RemoteOutput, ExecError>,
        duration: Duration,
    ) -> Self {
        let remote = match session {
            Ok(remote) => remote,
            Err(err) => return Self::failed(target, err, duration),
        };

        let outcome = match remote.exit_status {
            0 => Outcome::Success,
            exit_status => Outcome::Failure(ExecError::CommandFailed { exit_status }),
        };

        Self {
            target,
            output: remote.stdout,
            outcome,
            duration,
            truncated: remote.output_truncated,
        }
    }

    /// A result carrying only a failure reason
    pub fn failed(target: Target, err: ExecError, duration: Duration) -> Self {
        Self {
            target,
            output: Vec::new(),
            outcome: Outcome::Failure(err),
            duration,
            truncated: false,
        }
    }
}

/// Counts gathered by the aggregator for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub expected: usize,
    pub received: usize,
    pub failed: usize,
    pub timed_out: bool,
}

impl RunSummary {
    /// Map the summary to a process exit status
    pub fn exit_code(&self) -> i32 {
        if self.timed_out {
            EXIT_TIMED_OUT
        } else if self.failed > 0 {
            EXIT_HOST_FAILED
        } else {
            EXIT_OK
        }
    }
}
