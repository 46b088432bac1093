//! Remote command execution over SSH.

use ccr_common::config::{HostKeyPolicy, SshConfig};
use ccr_common::{ChaosError, CommandResult, RemoteShell, Result};
use openssh::{KnownHosts, Session, SessionBuilder};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::debug;

/// SSH connection options.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub user: String,
    pub key_file: Option<PathBuf>,
    /// Jump host used to reach agents on the private network.
    pub proxy_host: Option<String>,
    pub connect_timeout: Duration,
    pub host_keys: HostKeyPolicy,
}

impl SshOptions {
    pub fn from_config(config: &SshConfig, default_proxy: Option<String>) -> Self {
        Self {
            user: config.user.clone(),
            key_file: config.key_file.clone(),
            proxy_host: config.proxy_host.clone().or(default_proxy),
            connect_timeout: config.connect_timeout,
            host_keys: config.host_keys,
        }
    }

    fn builder(&self, host: &str) -> SessionBuilder {
        let mut builder = SessionBuilder::default();
        builder
            .user(self.user.clone())
            .connect_timeout(self.connect_timeout)
            .known_hosts_check(known_hosts(self.host_keys));
        if let Some(key) = &self.key_file {
            builder.keyfile(key);
        }
        if let Some(proxy) = &self.proxy_host
            && proxy != host
        {
            builder.jump_hosts([format!("{}@{proxy}", self.user)]);
        }
        builder
    }
}

fn known_hosts(policy: HostKeyPolicy) -> KnownHosts {
    match policy {
        HostKeyPolicy::Strict => KnownHosts::Strict,
        HostKeyPolicy::Add => KnownHosts::Add,
        HostKeyPolicy::Accept => KnownHosts::Accept,
    }
}

/// One SSH connection to a cluster node.
pub struct SshClient {
    host: String,
    options: SshOptions,
    session: Option<Session>,
}

impl SshClient {
    pub fn new(host: impl Into<String>, options: SshOptions) -> Self {
        Self {
            host: host.into(),
            options,
            session: None,
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        let session = self
            .options
            .builder(&self.host)
            .connect(&self.host)
            .await
            .map_err(|e| ChaosError::Transport(format!("ssh {}: {e}", self.host)))?;
        self.session = Some(session);
        Ok(())
    }

    pub async fn execute(&self, command: &str) -> Result<CommandResult> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| ChaosError::Transport(format!("ssh {}: not connected", self.host)))?;

        let start = Instant::now();
        let output = session
            .shell(command)
            .output()
            .await
            .map_err(|e| ChaosError::Transport(format!("ssh {}: {e}", self.host)))?;

        Ok(CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        })
    }

    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take()
            && let Err(e) = session.close().await
        {
            debug!(host = %self.host, error = %e, "SSH session close failed");
        }
    }
}

/// [`RemoteShell`] opening one SSH connection per command.
#[derive(Debug, Clone)]
pub struct SshShell {
    options: SshOptions,
}

impl SshShell {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

impl RemoteShell for SshShell {
    async fn run(&self, host: &str, command: &str) -> Result<CommandResult> {
        let mut client = SshClient::new(host, self.options.clone());
        client.connect().await?;
        let result = client.execute(command).await;
        client.disconnect().await;

        let result = result?;
        debug!(
            host,
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "Remote command finished"
        );
        Ok(result)
    }
}
