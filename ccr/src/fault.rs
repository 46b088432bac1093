//! Fault injection on cluster nodes.
//!
//! Every fault is a single remote command. A non-zero exit is raised as
//! [`ChaosError::CommandFailed`] naming the action and the host, so a fault
//! that did not happen never passes silently.

use ccr_common::{ChaosError, CommandResult, ControlPlane, HostSet, RemoteShell, Result};
use serde::Serialize;
use std::borrow::Cow;
use std::time::Duration;
use tracing::{info, warn};

/// Process-name patterns targeted by kill faults.
pub mod patterns {
    pub const CASSANDRA_DAEMON: &str = "CassandraDaemon";
    pub const SCHEDULER: &str = "cassandra.scheduler.Main";
    pub const EXECUTOR: &str = "cassandra.executor.Main";
    pub const MESOS_MASTER: &str = "mesos-master";
    pub const ZOOKEEPER: &str = "zookeeper";
}

/// Port of the agent process.
pub const AGENT_PORT: u16 = 5051;

/// Port of the master process.
pub const MASTER_PORT: u16 = 5050;

pub const SAVE_IPTABLES_COMMAND: &str =
    "if [ ! -e iptables.rules ] ; then sudo sh -c 'iptables-save > iptables.rules' ; fi";

pub const RESTORE_IPTABLES_COMMAND: &str =
    "if [ -e iptables.rules ]; then sudo iptables-restore < iptables.rules && rm iptables.rules ; fi";

const FLUSH_AND_ALLOW_COMMAND: &str = "sudo iptables -F INPUT && \
     sudo iptables --policy INPUT ACCEPT && \
     sudo iptables --policy OUTPUT ACCEPT && \
     sudo iptables --policy FORWARD ACCEPT";

/// Traffic blocked by a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionDirection {
    Incoming,
    Outgoing,
    Both,
}

impl PartitionDirection {
    fn blocks_incoming(self) -> bool {
        matches!(self, Self::Incoming | Self::Both)
    }

    fn blocks_outgoing(self) -> bool {
        matches!(self, Self::Outgoing | Self::Both)
    }
}

impl std::fmt::Display for PartitionDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incoming => f.write_str("incoming"),
            Self::Outgoing => f.write_str("outgoing"),
            Self::Both => f.write_str("incoming and outgoing"),
        }
    }
}

/// Command killing every process whose `ps` line matches `pattern`.
pub fn kill_command(pattern: &str) -> String {
    let quoted = shell_escape::unix::escape(Cow::Borrowed(pattern));
    format!(
        "sudo kill -9 $(ps ax | grep {quoted} | grep -v grep | tr -s ' ' | sed 's/^ *//g' | cut -d ' ' -f 1)"
    )
}

/// Command saving the firewall rules and rejecting `port` in `direction`.
pub fn partition_command(port: u16, direction: PartitionDirection) -> String {
    let mut parts = vec![
        SAVE_IPTABLES_COMMAND.to_string(),
        FLUSH_AND_ALLOW_COMMAND.to_string(),
    ];
    if direction.blocks_incoming() {
        parts.push(format!("sudo iptables -I INPUT -p tcp --dport {port} -j REJECT"));
    }
    if direction.blocks_outgoing() {
        parts.push(format!("sudo iptables -I OUTPUT -p tcp --sport {port} -j REJECT"));
    }
    parts.join(" && ")
}

/// Run `command` on `host`, turning a non-zero exit into
/// [`ChaosError::CommandFailed`].
pub(crate) async fn run_checked<S: RemoteShell>(
    shell: &S,
    host: &str,
    command: &str,
    action: &str,
) -> Result<CommandResult> {
    info!(host, action, "Running remote action");
    let result = shell.run(host, command).await?;
    if !result.success() {
        warn!(
            host,
            action,
            exit_code = result.exit_code,
            stderr = %result.stderr.trim(),
            "Remote action failed"
        );
        return Err(ChaosError::CommandFailed {
            action: action.to_string(),
            host: host.to_string(),
            exit_code: result.exit_code,
            stderr: result.stderr.trim().to_string(),
        });
    }
    Ok(result)
}

pub struct FaultInjector<'a, C, S> {
    control_plane: &'a C,
    shell: &'a S,
    dwell: Duration,
}

impl<'a, C: ControlPlane, S: RemoteShell> FaultInjector<'a, C, S> {
    pub fn new(control_plane: &'a C, shell: &'a S, dwell: Duration) -> Self {
        Self {
            control_plane,
            shell,
            dwell,
        }
    }

    /// Kill processes matching `pattern` on `host`, or on the control-plane
    /// leader when no host is given.
    pub async fn kill_task_with_pattern(&self, pattern: &str, host: Option<&str>) -> Result<String> {
        let host = match host {
            Some(host) => host.to_string(),
            None => self.control_plane.leader_ip().await?,
        };
        let action = format!("kill task with pattern {pattern:?}");
        run_checked(self.shell, &host, &kill_command(pattern), &action).await?;
        Ok(host)
    }

    /// Kill `pattern` on each host in turn.
    pub async fn kill_on_hosts(&self, pattern: &str, hosts: &HostSet) -> Result<()> {
        for host in hosts {
            self.kill_task_with_pattern(pattern, Some(host)).await?;
        }
        Ok(())
    }

    pub async fn partition_agent(&self, host: &str) -> Result<()> {
        let command = partition_command(AGENT_PORT, PartitionDirection::Both);
        run_checked(self.shell, host, &command, "partition agent").await?;
        Ok(())
    }

    pub async fn reconnect_agent(&self, host: &str) -> Result<()> {
        run_checked(self.shell, host, RESTORE_IPTABLES_COMMAND, "reconnect agent").await?;
        Ok(())
    }

    pub async fn partition_master(&self, host: &str, direction: PartitionDirection) -> Result<()> {
        let command = partition_command(MASTER_PORT, direction);
        let action = format!("partition master ({direction})");
        run_checked(self.shell, host, &command, &action).await?;
        Ok(())
    }

    pub async fn reconnect_master(&self, host: &str) -> Result<()> {
        run_checked(self.shell, host, RESTORE_IPTABLES_COMMAND, "reconnect master").await?;
        Ok(())
    }

    /// Partition every host, hold for the dwell time, then reconnect every
    /// host. If a partition fails, hosts touched so far are restored before
    /// the error is returned.
    pub async fn partition_agents_for_dwell(&self, hosts: &HostSet) -> Result<()> {
        let mut touched: Vec<&str> = Vec::with_capacity(hosts.len());
        for host in hosts {
            touched.push(host);
            if let Err(e) = self.partition_agent(host).await {
                self.restore_best_effort(&touched).await;
                return Err(e);
            }
        }
        info!(hosts = hosts.len(), dwell_secs = self.dwell.as_secs(), "Agents partitioned");
        tokio::time::sleep(self.dwell).await;
        for host in hosts {
            self.reconnect_agent(host).await?;
        }
        Ok(())
    }

    pub async fn partition_master_for_dwell(
        &self,
        host: &str,
        direction: PartitionDirection,
    ) -> Result<()> {
        if let Err(e) = self.partition_master(host, direction).await {
            self.restore_best_effort(&[host]).await;
            return Err(e);
        }
        info!(host, %direction, dwell_secs = self.dwell.as_secs(), "Master partitioned");
        tokio::time::sleep(self.dwell).await;
        self.reconnect_master(host).await
    }

    /// Restore saved firewall rules on `hosts`, logging failures.
    async fn restore_best_effort(&self, hosts: &[&str]) {
        for &host in hosts {
            match self.shell.run(host, RESTORE_IPTABLES_COMMAND).await {
                Ok(result) if result.success() => {
                    info!(host, "Firewall rules restored after failed partition");
                }
                Ok(result) => warn!(
                    host,
                    exit_code = result.exit_code,
                    stderr = %result.stderr.trim(),
                    "Firewall restore failed"
                ),
                Err(e) => warn!(host, error = %e, "Firewall restore failed"),
            }
        }
    }
}
