//! Recovery actions run after a fault.

use crate::fault::run_checked;
use crate::health::HealthProber;
use crate::plan::PlanObserver;
use ccr_common::{
    ChaosError, ControlPlane, HostSet, RemoteShell, Result, ServiceTask, SpinOptions, Verdict,
    spin,
};
use serde_json::Value;
use tracing::{debug, info, warn};

pub const RESTART_AGENT_COMMAND: &str = "sudo systemctl restart dcos-mesos-slave";

pub const RESTART_ERLANG_COMMAND: &str = "sudo systemctl restart dcos-epmd.service";

/// Unit whose health tells whether a node's DNS is up.
pub const DNS_UNIT: &str = "dcos-spartan.service";

/// Hosts from `hosts` that do not run any task in `TASK_RUNNING`.
pub fn find_failed_hosts(hosts: &HostSet, tasks: &[ServiceTask]) -> HostSet {
    let mut failed = hosts.clone();
    for task in tasks.iter().filter(|task| task.is_running()) {
        failed.remove(&task.host);
    }
    failed
}

pub struct Recovery<'a, C, S> {
    control_plane: &'a C,
    shell: &'a S,
    health: HealthProber<'a, C>,
    plans: PlanObserver<'a, C>,
    options: SpinOptions,
}

impl<'a, C: ControlPlane, S: RemoteShell> Recovery<'a, C, S> {
    pub fn new(
        control_plane: &'a C,
        shell: &'a S,
        health: HealthProber<'a, C>,
        plans: PlanObserver<'a, C>,
        options: SpinOptions,
    ) -> Self {
        Self {
            control_plane,
            shell,
            health,
            plans,
            options,
        }
    }

    pub async fn restart_agent(&self, host: &str) -> Result<()> {
        run_checked(self.shell, host, RESTART_AGENT_COMMAND, "restart agent").await?;
        Ok(())
    }

    pub async fn restart_erlang(&self, host: &str) -> Result<()> {
        run_checked(self.shell, host, RESTART_ERLANG_COMMAND, "restart erlang daemon").await?;
        Ok(())
    }

    /// Restart the agent on every host in `hosts` that no longer runs a
    /// service task. Returns the restarted hosts.
    pub async fn recover_failed_agents(&self, hosts: &HostSet) -> Result<HostSet> {
        let tasks = self.health.check_health(false).await?;
        let failed = find_failed_hosts(hosts, &tasks);
        if failed.is_empty() {
            info!(hosts = hosts.len(), "No failed agents");
        }
        for host in &failed {
            info!(host = %host, "Restarting agent");
            self.restart_agent(host).await?;
        }
        Ok(failed)
    }

    /// Give the plan a chance to complete, then restart every agent.
    pub async fn recover_agents(&self, hosts: &HostSet) -> Result<()> {
        let observation = self.plans.settle().await?;
        if !observation.converged {
            warn!("Plan not complete before agent restart");
        }
        for host in hosts {
            info!(host = %host, "Restarting agent");
            self.restart_agent(host).await?;
        }
        Ok(())
    }

    /// Whether the DNS unit reports healthy on `host`. Failures count as
    /// unhealthy.
    pub async fn is_dns_healthy(&self, host: &str) -> bool {
        match self.control_plane.unit_health(DNS_UNIT, host).await {
            Ok(code) => code == 0,
            Err(e) => {
                debug!(host, error = %e, "DNS health call not responding");
                false
            }
        }
    }

    /// Restart the erlang daemon and the agent on a host that was
    /// partitioned.
    pub async fn recover_host_from_partitioning(&self, host: &str) -> Result<()> {
        let dns_healthy = self.is_dns_healthy(host).await;
        info!(host, dns_healthy, "Restarting erlang and agent");
        self.restart_erlang(host).await?;
        self.restart_agent(host).await
    }

    pub async fn recover_hosts_from_partitioning(&self, hosts: &HostSet) -> Result<()> {
        for host in hosts {
            self.recover_host_from_partitioning(host).await?;
        }
        Ok(())
    }

    /// Wait until the control-plane leader differs from `old_leader` and
    /// return the new leader.
    ///
    /// Lookup failures count as "not changed yet".
    pub async fn verify_leader_changed(&self, old_leader: &str) -> Result<String> {
        let control_plane = self.control_plane;
        let outcome = spin(
            "leader change",
            &self.options,
            move || async move {
                match control_plane.leader_ip().await {
                    Ok(ip) => ip,
                    Err(e) => {
                        debug!(error = %e, "Got error while fetching leader");
                        old_leader.to_string()
                    }
                }
            },
            |leader: &String| Verdict::new(leader != old_leader, "Leader has not changed"),
        )
        .await?;
        info!(old_leader, new_leader = %outcome.value, "Leader has changed");
        Ok(outcome.value)
    }

    /// Wait until the admin router on `master_ip` serves metadata naming that
    /// master again.
    pub async fn block_on_admin_router(&self, master_ip: &str) -> Result<()> {
        let control_plane = self.control_plane;
        spin(
            "admin router",
            &self.options,
            move || async move { control_plane.master_metadata(master_ip).await },
            |reply: &Result<Value>| match reply {
                Ok(doc) => match doc.get("PUBLIC_IPV4").and_then(Value::as_str) {
                    Some(ip) => Verdict::new(ip == master_ip, "Master is not healthy yet"),
                    None => Verdict::pending("Failed to parse json"),
                },
                Err(e) => Verdict::pending(format!("Metadata request failed: {e}")),
            },
        )
        .await?;
        info!(master_ip, "Master is up again");
        Ok(())
    }
}

/// Fail when `hosts` is empty; recovery over no hosts means discovery broke.
pub(crate) fn require_hosts(hosts: &HostSet, what: &str) -> Result<()> {
    if hosts.is_empty() {
        return Err(ChaosError::Config(format!("no hosts found for {what}")));
    }
    Ok(())
}
