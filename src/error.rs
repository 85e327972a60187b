//! Error types for sshfan

use thiserror::Error;

/// Top-level sshfan error types
#[derive(Error, Debug)]
pub enum SshfanError {
    /// Settings file or environment could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Settings loaded but rejected by validation
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    /// I/O errors (stdout, settings file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Command validation errors
    #[error("Command exceeds {limit} bytes")]
    CommandTooLong { limit: usize },

    /// Empty command or host list
    #[error("Usage error: {0}")]
    Usage(String),
}

/// Failure to produce an authentication capability
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The SSH agent socket is unset or cannot be connected
    #[error("SSH agent unavailable: {0}")]
    AgentUnavailable(String),

    /// The private key file cannot be opened or read
    #[error("Cannot read key file '{path}': {message}")]
    UnreadableFile { path: String, message: String },

    /// The private key file does not contain a usable private key
    #[error("Cannot parse key file '{path}': {message}")]
    ParseError { path: String, message: String },
}

/// Per-host execution failures, carried as data inside a result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Host unreachable, connection refused or connect timed out
    #[error("Failed to dial {host}: {message}")]
    Dial { host: String, message: String },

    /// Handshake, channel or read failure after the connection was up
    #[error("Session error on {host}: {message}")]
    Session { host: String, message: String },

    /// Credential rejected by the server
    #[error("Authentication failed for {user}@{host}: {message}")]
    Auth {
        host: String,
        user: String,
        message: String,
    },

    /// Pseudo-terminal refused; the command still runs without one
    #[error("Request for pseudo terminal on {host} failed: {message}")]
    Pty { host: String, message: String },

    /// Remote command exited with a nonzero status
    #[error("Command exited with status {exit_status}")]
    CommandFailed { exit_status: i32 },

    /// No credential could be produced for this run
    #[error("No credential: {0}")]
    Credential(#[from] CredentialError),

    /// Run deadline fired before this host finished
    #[error("Cancelled at run deadline")]
    Cancelled,

    /// Blocking worker panicked or was aborted
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Result type alias using SshfanError
pub type Result<T> = std::result::Result<T, SshfanError>;
