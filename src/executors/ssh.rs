//! SSH session client for remote command execution
//!
//! Each call opens a fresh connection, authenticates with the shared
//! credential, asks for a pseudo terminal and runs the command, buffering its
//! standard output in full.
//!
//! # Cancellation
//!
//! `ssh2` is synchronous, so the session runs on tokio's blocking pool. The
//! cancellation token is checked before every step and between read chunks.
//! When it fires while libssh2 is blocked on the socket, the async side shuts
//! the TCP stream down so the blocked call returns at once and the
//! connection is released.
//!
//! # Host keys
//!
//! Host keys are not verified. Operators reach hosts by alias or IP and the
//! banner cross-checks the remote hostname instead.
//!
//! # Example
//!
//! ```no_run
//! use sshfan::credential::{Credential, CredentialSource};
//! use sshfan::executors::ssh::{SshClientConfig, SshSessionClient};
//! use sshfan::executors::SessionClient;
//! use sshfan::models::Target;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = SshSessionClient::new(SshClientConfig::new("deploy"))?;
//! let credential = Arc::new(Credential::acquire(&CredentialSource::Agent)?);
//! let output = client
//!     .execute("uptime", &Target::new("example.com"), credential, &CancellationToken::new())
//!     .await?;
//! println!("{}", String::from_utf8_lossy(&output.stdout));
//! # Ok(())
//! # }
//! ```

use crate::credential::Credential;
use crate::error::{ExecError, Result, SshfanError};
use crate::executors::{truncate_output_bytes, SessionClient};
use crate::models::{
    RemoteOutput, Target, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_SSH_PORT, MAX_OUTPUT_SIZE,
    PTY_BAUD, PTY_COLUMNS, PTY_ROWS, PTY_TERM,
};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use ssh2::{Channel, ExtendedData, PtyModeOpcode, PtyModes, Session};
use std::io::Read;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 8_192;

/// Connection settings shared by every session of a run
#[derive(Debug, Clone)]
pub struct SshClientConfig {
    pub user: String,
    pub port: u16,
    /// Timeout for each TCP connect attempt
    pub connect_timeout: Duration,
}

impl SshClientConfig {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            port: DEFAULT_SSH_PORT,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// ssh2-backed [`SessionClient`]
#[derive(Debug, Clone)]
pub struct SshSessionClient {
    config: Arc<SshClientConfig>,
}

impl SshSessionClient {
    /// Create a client, rejecting unusable settings up front
    pub fn new(config: SshClientConfig) -> Result<Self> {
        if config.user.is_empty() {
            return Err(SshfanError::InvalidSetting(
                "SSH user cannot be empty".to_string(),
            ));
        }
        if config.port == 0 {
            return Err(SshfanError::InvalidSetting(
                "SSH port cannot be 0".to_string(),
            ));
        }
        if config.connect_timeout.is_zero() {
            return Err(SshfanError::InvalidSetting(
                "connect timeout cannot be 0".to_string(),
            ));
        }

        Ok(Self {
            config: Arc::new(config),
        })
    }
}

#[async_trait]
impl SessionClient for SshSessionClient {
    async fn execute(
        &self,
        command: &str,
        target: &Target,
        credential: Arc<Credential>,
        cancel: &CancellationToken,
    ) -> std::result::Result<RemoteOutput, ExecError> {
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }

        let switch = StreamSwitch::default();
        let job = {
            let config = self.config.clone();
            let command = command.to_string();
            let target = target.clone();
            let cancel = cancel.clone();
            let switch = switch.clone();
            tokio::task::spawn_blocking(move || {
                let session = BlockingSession {
                    config: &config,
                    target: &target,
                    cancel: &cancel,
                    switch: &switch,
                };
                session.run(&command, &credential)
            })
        };

        tokio::select! {
            joined = job => {
                joined.map_err(|e| ExecError::Worker(format!("SSH worker for {} failed: {}", target, e)))?
            }
            _ = cancel.cancelled() => {
                debug!(host = %target, "Cancelling SSH session");
                switch.trip();
                Err(ExecError::Cancelled)
            }
        }
    }
}

/// Holds a clone of the live TCP stream so another thread can shut it down
#[derive(Clone, Default)]
struct StreamSwitch {
    stream: Arc<Mutex<Option<TcpStream>>>,
}

impl StreamSwitch {
    /// Register the live stream; shuts it down at once if already cancelled
    fn arm(&self, stream: &TcpStream, cancel: &CancellationToken) {
        match stream.try_clone() {
            Ok(clone) => {
                if let Ok(mut slot) = self.stream.lock() {
                    *slot = Some(clone);
                }
            }
            Err(e) => debug!("Cannot clone TCP stream for cancellation: {}", e),
        }
        if cancel.is_cancelled() {
            self.trip();
        }
    }

    fn trip(&self) {
        if let Ok(mut slot) = self.stream.lock() {
            if let Some(stream) = slot.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }
}

/// One blocking SSH conversation with a single host
struct BlockingSession<'a> {
    config: &'a SshClientConfig,
    target: &'a Target,
    cancel: &'a CancellationToken,
    switch: &'a StreamSwitch,
}

impl BlockingSession<'_> {
    fn run(&self, command: &str, credential: &Credential) -> std::result::Result<RemoteOutput, ExecError> {
        let start = Instant::now();

        let tcp = self.dial()?;
        self.switch.arm(&tcp, self.cancel);

        self.checkpoint()?;
        let mut session = Session::new().map_err(|e| self.session_error("Failed to create SSH session", e))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| self.session_error("SSH handshake failed", e))?;

        self.checkpoint()?;
        self.authenticate(&session, credential)?;

        self.checkpoint()?;
        let mut channel = session
            .channel_session()
            .map_err(|e| self.session_error("Failed to open channel", e))?;

        let pty_allocated = self.request_pty(&mut channel);

        // stderr is not captured; discarding it keeps the channel window moving
        channel
            .handle_extended_data(ExtendedData::Ignore)
            .map_err(|e| self.session_error("Failed to configure stderr", e))?;

        self.checkpoint()?;
        debug!(host = %self.target, "Executing command");
        channel
            .exec(command)
            .map_err(|e| self.session_error("Failed to execute command", e))?;

        let (stdout, output_truncated) = self.read_stdout(&mut channel)?;

        channel
            .wait_close()
            .map_err(|e| self.session_error("Failed to close channel", e))?;
        let exit_status = channel
            .exit_status()
            .map_err(|e| self.session_error("Failed to get exit status", e))?;

        let _ = session.disconnect(None, "done", None);

        info!(
            host = %self.target,
            exit_status,
            pty_allocated,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "SSH command completed"
        );

        Ok(RemoteOutput {
            stdout,
            exit_status,
            output_truncated,
        })
    }

    fn checkpoint(&self) -> std::result::Result<(), ExecError> {
        if self.cancel.is_cancelled() {
            Err(ExecError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Connect to the first resolved address that answers
    fn dial(&self) -> std::result::Result<TcpStream, ExecError> {
        self.checkpoint()?;

        let host = self.target.as_str();
        let addrs = (host, self.config.port)
            .to_socket_addrs()
            .map_err(|e| ExecError::Dial {
                host: host.to_string(),
                message: format!("cannot resolve: {}", e),
            })?;

        let mut last_error = format!("{} resolved to no addresses", host);
        for addr in addrs {
            self.checkpoint()?;
            debug!(host, %addr, "Connecting");
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(tcp) => return Ok(tcp),
                Err(e) => last_error = format!("{}: {}", addr, e),
            }
        }

        self.checkpoint()?;
        Err(ExecError::Dial {
            host: host.to_string(),
            message: last_error,
        })
    }

    fn authenticate(&self, session: &Session, credential: &Credential) -> std::result::Result<(), ExecError> {
        let user = self.config.user.as_str();
        let auth_error = |message: String| ExecError::Auth {
            host: self.target.to_string(),
            user: user.to_string(),
            message,
        };

        match credential {
            Credential::Agent { .. } => {
                let mut agent = session
                    .agent()
                    .map_err(|e| auth_error(format!("agent init: {}", e)))?;
                agent
                    .connect()
                    .map_err(|e| auth_error(format!("agent connect: {}", e)))?;
                agent
                    .list_identities()
                    .map_err(|e| auth_error(format!("agent identities: {}", e)))?;

                let identities = agent
                    .identities()
                    .map_err(|e| auth_error(format!("agent identities: {}", e)))?;
                for identity in &identities {
                    self.checkpoint()?;
                    match agent.userauth(user, identity) {
                        Ok(()) => break,
                        Err(e) => debug!(host = %self.target, key = identity.comment(), "Agent identity rejected: {}", e),
                    }
                }
                let _ = agent.disconnect();
            }
            Credential::KeyFile {
                private_key,
                passphrase,
                ..
            } => {
                session
                    .userauth_pubkey_memory(
                        user,
                        None,
                        private_key.expose_secret(),
                        passphrase.as_ref().map(|p| p.expose_secret()),
                    )
                    .map_err(|e| {
                        if self.cancel.is_cancelled() {
                            ExecError::Cancelled
                        } else {
                            auth_error(e.to_string())
                        }
                    })?;
            }
        }

        self.checkpoint()?;
        if !session.authenticated() {
            return Err(auth_error("no identity was accepted".to_string()));
        }

        debug!(host = %self.target, credential = %credential.describe(), "Authenticated");
        Ok(())
    }

    /// Ask for a terminal; a refusal is logged and the command runs without one
    fn request_pty(&self, channel: &mut Channel) -> bool {
        let mut modes = PtyModes::new();
        modes.set_boolean(PtyModeOpcode::ECHO, false);
        modes.set_u32(PtyModeOpcode::TTY_OP_ISPEED, PTY_BAUD);
        modes.set_u32(PtyModeOpcode::TTY_OP_OSPEED, PTY_BAUD);

        self.pty_granted(channel.request_pty(PTY_TERM, Some(modes), Some((PTY_COLUMNS, PTY_ROWS, 0, 0))))
    }

    /// A refused terminal is a warning, never a session failure
    fn pty_granted(&self, requested: std::result::Result<(), ssh2::Error>) -> bool {
        match requested {
            Ok(()) => true,
            Err(e) => {
                let warning = ExecError::Pty {
                    host: self.target.to_string(),
                    message: e.to_string(),
                };
                warn!(host = %self.target, "{}; continuing without a terminal", warning);
                false
            }
        }
    }

    /// Drain stdout, keeping at most MAX_OUTPUT_SIZE bytes
    fn read_stdout(&self, channel: &mut Channel) -> std::result::Result<(Vec<u8>, bool), ExecError> {
        let mut stdout = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        let mut truncated = false;

        loop {
            self.checkpoint()?;
            let n = channel
                .read(&mut chunk)
                .map_err(|e| self.io_error("Failed to read stdout", e))?;
            if n == 0 {
                break;
            }
            if stdout.len() < MAX_OUTPUT_SIZE {
                stdout.extend_from_slice(&chunk[..n]);
                truncated |= truncate_output_bytes(&mut stdout);
            } else {
                truncated = true;
            }
        }

        if truncated {
            warn!(host = %self.target, "Output truncated to {} bytes", MAX_OUTPUT_SIZE);
        }

        Ok((stdout, truncated))
    }

    fn session_error(&self, context: &str, err: ssh2::Error) -> ExecError {
        self.classify(format!("{}: {}", context, err))
    }

    fn io_error(&self, context: &str, err: std::io::Error) -> ExecError {
        self.classify(format!("{}: {}", context, err))
    }

    /// Failures caused by our own shutdown are reported as cancellation
    fn classify(&self, message: String) -> ExecError {
        if self.cancel.is_cancelled() {
            ExecError::Cancelled
        } else {
            ExecError::Session {
                host: self.target.to_string(),
                message,
            }
        }
    }
}
