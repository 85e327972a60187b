//! CLI interface for sshfan

use crate::banner::hosts_line;
use crate::credential::{Credential, CredentialSource};
use crate::error::SshfanError;
use crate::executors::ssh::{SshClientConfig, SshSessionClient};
use crate::logging::{init_logging, LogConfig};
use crate::models::{parse_targets, prepare_command, EXIT_USAGE};
use crate::runner::Runner;
use crate::settings::Settings;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use secrecy::SecretString;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// sshfan - run one command on many hosts over SSH
#[derive(Parser, Debug)]
#[command(name = "sshfan")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run one command on many hosts over SSH under a single deadline", long_about = None)]
#[command(arg_required_else_help = true)]
#[command(after_help = "Example: sshfan --cmd 'echo test; ping -c1 localhost' --hosts 'host1 host2'")]
pub struct Cli {
    /// Command to run on every host
    #[arg(long, value_name = "COMMAND")]
    pub cmd: String,

    /// Space-separated list of hosts
    #[arg(long, value_name = "HOSTS")]
    pub hosts: String,

    /// Remote user (default: $LOGNAME)
    #[arg(short, long)]
    pub user: Option<String>,

    /// Private key file (default: use the SSH agent)
    #[arg(short, long, value_name = "PATH")]
    pub identity: Option<PathBuf>,

    /// Environment variable holding the private key passphrase
    #[arg(long, value_name = "VAR", requires = "identity")]
    pub passphrase_env: Option<String>,

    /// SSH port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Global deadline for the whole run, in seconds
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Timeout for each connection attempt, in seconds
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Maximum hosts in flight at once (0 = unbounded)
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Do not prefix the command with a remote hostname echo
    #[arg(long)]
    pub no_hostname_echo: bool,

    /// Settings file (TOML, YAML or JSON)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "warn")]
    pub log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Cli {
    /// Initialize logging based on CLI arguments
    pub fn init_logging(&self) -> anyhow::Result<()> {
        let config = LogConfig {
            level: self.log_level.as_str().into(),
            format: self.log_format.as_str().into(),
        };

        init_logging(&config)
    }

    /// Run the command and return the process exit status
    pub async fn execute(&self) -> anyhow::Result<i32> {
        let settings = match self.settings() {
            Ok(settings) => settings,
            Err(err @ SshfanError::InvalidSetting(_)) => return Ok(usage_error(&err.to_string())),
            Err(err) => return Err(err.into()),
        };

        let targets = parse_targets(&self.hosts);
        if targets.is_empty() {
            return Ok(usage_error("--hosts does not name any host"));
        }

        let command = match prepare_command(&self.cmd, settings.hostname_echo) {
            Ok(command) => command,
            Err(err @ (SshfanError::Usage(_) | SshfanError::CommandTooLong { .. })) => {
                return Ok(usage_error(&err.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let Some(user) = settings.remote_user() else {
            return Ok(usage_error("no remote user: pass --user or set LOGNAME"));
        };

        let source = match self.credential_source(&settings) {
            Ok(source) => source,
            Err(message) => return Ok(usage_error(&message)),
        };

        let client = SshSessionClient::new(
            SshClientConfig::new(user.clone())
                .with_port(settings.port)
                .with_connect_timeout(settings.connect_timeout()),
        )?;

        let credential = Credential::acquire(&source).map(Arc::new);
        match &credential {
            Ok(credential) => info!(user = %user, credential = %credential.describe(), "Credential ready"),
            Err(err) => error!("{}; every host will be reported as failed", err),
        }

        let mut stdout = io::stdout();
        stdout.write_all(hosts_line(&targets).as_bytes())?;
        stdout.flush()?;

        let runner = Runner::new(Arc::new(client), credential, command, settings.run_config());
        let summary = runner.run(&targets, &mut stdout).await?;

        Ok(summary.exit_code())
    }

    /// Settings from file and environment with command-line overrides applied
    pub fn settings(&self) -> crate::error::Result<Settings> {
        self.layered(Settings::load(self.config.as_deref())?)
    }

    /// Put the command line on top of file and environment, then validate
    fn layered(&self, mut settings: Settings) -> crate::error::Result<Settings> {
        self.apply_overrides(&mut settings);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(user) = &self.user {
            settings.user = Some(user.clone());
        }
        if let Some(identity) = &self.identity {
            settings.identity = Some(identity.clone());
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(timeout) = self.timeout {
            settings.timeout_secs = timeout;
        }
        if let Some(timeout) = self.connect_timeout {
            settings.connect_timeout_secs = timeout;
        }
        if let Some(max_parallel) = self.max_parallel {
            settings.max_parallel = max_parallel;
        }
        if self.no_hostname_echo {
            settings.hostname_echo = false;
        }
    }

    /// Agent unless a key file was configured
    fn credential_source(&self, settings: &Settings) -> Result<CredentialSource, String> {
        let Some(path) = settings.identity.clone() else {
            return Ok(CredentialSource::Agent);
        };

        let passphrase = match &self.passphrase_env {
            Some(var) => match std::env::var(var) {
                Ok(value) => Some(SecretString::from(value)),
                Err(_) => return Err(format!("passphrase variable {} is not set", var)),
            },
            None => None,
        };

        Ok(CredentialSource::KeyFile { path, passphrase })
    }
}

/// Print a usage error the way clap does and return the usage exit status
fn usage_error(message: &str) -> i32 {
    let _ = Cli::command().error(ErrorKind::ValueValidation, message).print();
    EXIT_USAGE
}
