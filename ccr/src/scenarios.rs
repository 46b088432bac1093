//! The scenario catalog and its execution.
//!
//! A scenario is a fixed composition of an operation, a fault and a recovery
//! action. Scenarios without an operation run the fault and recovery
//! directly; the others go through the [`OperationSequencer`] so the fault
//! lands while the scheduler works on a fresh plan.
//!
//! [`OperationSequencer`]: crate::sequencer::OperationSequencer

use crate::fault::{PartitionDirection, patterns};
use crate::harness::Harness;
use crate::recovery::require_hosts;
use crate::sequencer::{PlannedOperation, SequenceReport, Stage, stage};
use ccr_common::{ChaosError, ControlPlane, HostSet, RemoteShell, Result};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// CPU step of configuration-update scenarios.
pub const CPU_STEP: f64 = 0.1;

/// What makes the scheduler start new plan work.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "delta", rename_all = "snake_case")]
pub enum Operation {
    None,
    BumpCpu(f64),
    Cleanup,
    Repair,
}

/// How many service nodes a fault hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Spread {
    One,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum Fault {
    KillDataProcess(Spread),
    KillScheduler,
    KillExecutor(Spread),
    KillMasterLeader,
    KillZookeeperLeader,
    PartitionAgents(Spread),
    PartitionMaster(PartitionDirection),
}

/// Hosts a recovery action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostScope {
    /// The hosts the fault hit.
    Faulted,
    /// Every host running the service.
    AllNodes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "scope", rename_all = "snake_case")]
pub enum RecoveryAction {
    None,
    RestartFailedAgents(HostScope),
    AwaitLeaderChange,
    AwaitAdminRouter,
    RecoverPartitionedHosts,
}

/// One named entry of the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioSpec {
    pub name: String,
    pub operation: Operation,
    pub fault: Fault,
    /// Runs right after the fault, inside the sequence for planned scenarios.
    pub recovery: RecoveryAction,
    /// Runs after the whole sequence, before the health check.
    pub follow_up: RecoveryAction,
}

impl ScenarioSpec {
    fn standalone(name: &str, fault: Fault, recovery: RecoveryAction) -> Self {
        Self {
            name: name.to_string(),
            operation: Operation::None,
            fault,
            recovery,
            follow_up: RecoveryAction::None,
        }
    }

    pub fn is_planned(&self) -> bool {
        self.operation != Operation::None
    }

    fn needs_all_hosts(&self) -> bool {
        [self.recovery, self.follow_up]
            .contains(&RecoveryAction::RestartFailedAgents(HostScope::AllNodes))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::BumpCpu(delta) => write!(f, "bump CPU {delta:+}"),
            Self::Cleanup => f.write_str("cleanup"),
            Self::Repair => f.write_str("repair"),
        }
    }
}

impl fmt::Display for Spread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => f.write_str("one node"),
            Self::All => f.write_str("all nodes"),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KillDataProcess(spread) => write!(f, "kill {} on {spread}", patterns::CASSANDRA_DAEMON),
            Self::KillScheduler => write!(f, "kill {}", patterns::SCHEDULER),
            Self::KillExecutor(spread) => write!(f, "kill {} on {spread}", patterns::EXECUTOR),
            Self::KillMasterLeader => write!(f, "kill {} on leader", patterns::MESOS_MASTER),
            Self::KillZookeeperLeader => write!(f, "kill {} on leader", patterns::ZOOKEEPER),
            Self::PartitionAgents(spread) => write!(f, "partition {spread}"),
            Self::PartitionMaster(direction) => write!(f, "partition leader ({direction})"),
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::RestartFailedAgents(HostScope::Faulted) => {
                f.write_str("restart failed agents on faulted hosts")
            }
            Self::RestartFailedAgents(HostScope::AllNodes) => {
                f.write_str("restart failed agents on all nodes")
            }
            Self::AwaitLeaderChange => f.write_str("wait for leader change"),
            Self::AwaitAdminRouter => f.write_str("wait for admin router"),
            Self::RecoverPartitionedHosts => f.write_str("restart erlang and agent"),
        }
    }
}

/// Faults combined with every operation, with the recovery and follow-up
/// each one needs inside a planned scenario.
const PLANNED_FAULTS: [(&str, Fault, RecoveryAction, RecoveryAction); 9] = [
    (
        "kill_task_in_node",
        Fault::KillDataProcess(Spread::One),
        RecoveryAction::RestartFailedAgents(HostScope::AllNodes),
        RecoveryAction::None,
    ),
    (
        "kill_all_task_in_node",
        Fault::KillDataProcess(Spread::All),
        RecoveryAction::RestartFailedAgents(HostScope::AllNodes),
        RecoveryAction::None,
    ),
    (
        "scheduler_died",
        Fault::KillScheduler,
        RecoveryAction::None,
        RecoveryAction::None,
    ),
    (
        "executor_killed",
        Fault::KillExecutor(Spread::One),
        RecoveryAction::RestartFailedAgents(HostScope::Faulted),
        RecoveryAction::None,
    ),
    (
        "all_executors_killed",
        Fault::KillExecutor(Spread::All),
        RecoveryAction::RestartFailedAgents(HostScope::AllNodes),
        RecoveryAction::None,
    ),
    (
        "master_killed",
        Fault::KillMasterLeader,
        RecoveryAction::None,
        RecoveryAction::AwaitLeaderChange,
    ),
    (
        "zk_killed",
        Fault::KillZookeeperLeader,
        RecoveryAction::AwaitLeaderChange,
        RecoveryAction::None,
    ),
    (
        "partition",
        Fault::PartitionAgents(Spread::One),
        RecoveryAction::RecoverPartitionedHosts,
        RecoveryAction::None,
    ),
    (
        "all_partition",
        Fault::PartitionAgents(Spread::All),
        RecoveryAction::RecoverPartitionedHosts,
        RecoveryAction::None,
    ),
];

/// Every scenario, in suite order.
pub fn catalog() -> Vec<ScenarioSpec> {
    use RecoveryAction as R;

    let mut scenarios = vec![
        ScenarioSpec::standalone("kill_task_in_node", Fault::KillDataProcess(Spread::One), R::None),
        ScenarioSpec::standalone(
            "kill_all_task_in_node",
            Fault::KillDataProcess(Spread::All),
            R::RestartFailedAgents(HostScope::AllNodes),
        ),
        ScenarioSpec::standalone("scheduler_died", Fault::KillScheduler, R::None),
        ScenarioSpec::standalone(
            "executor_killed",
            Fault::KillExecutor(Spread::One),
            R::RestartFailedAgents(HostScope::Faulted),
        ),
        ScenarioSpec::standalone(
            "all_executors_killed",
            Fault::KillExecutor(Spread::All),
            R::RestartFailedAgents(HostScope::AllNodes),
        ),
        ScenarioSpec::standalone(
            "master_killed_block_on_admin_router",
            Fault::KillMasterLeader,
            R::AwaitLeaderChange,
        ),
        ScenarioSpec::standalone("zk_killed_recovery", Fault::KillZookeeperLeader, R::AwaitAdminRouter),
        ScenarioSpec::standalone("zk_killed", Fault::KillZookeeperLeader, R::AwaitLeaderChange),
        ScenarioSpec::standalone(
            "partition",
            Fault::PartitionAgents(Spread::One),
            R::RecoverPartitionedHosts,
        ),
        ScenarioSpec::standalone(
            "partition_master_both_ways",
            Fault::PartitionMaster(PartitionDirection::Both),
            R::None,
        ),
        ScenarioSpec::standalone(
            "partition_master_incoming",
            Fault::PartitionMaster(PartitionDirection::Incoming),
            R::None,
        ),
        ScenarioSpec::standalone(
            "partition_master_outgoing",
            Fault::PartitionMaster(PartitionDirection::Outgoing),
            R::None,
        ),
        ScenarioSpec::standalone(
            "all_partition",
            Fault::PartitionAgents(Spread::All),
            R::RecoverPartitionedHosts,
        ),
    ];

    let operations = [
        ("config_update", None),
        ("cleanup", Some(Operation::Cleanup)),
        ("repair", Some(Operation::Repair)),
    ];
    for (prefix, operation) in operations {
        for (i, (fault_name, fault, recovery, follow_up)) in PLANNED_FAULTS.iter().enumerate() {
            // CPU bumps alternate direction in catalog order.
            let operation = match operation {
                Some(operation) => operation,
                None if i % 2 == 0 => Operation::BumpCpu(CPU_STEP),
                None => Operation::BumpCpu(-CPU_STEP),
            };
            scenarios.push(ScenarioSpec {
                name: format!("{prefix}_then_{fault_name}"),
                operation,
                fault: *fault,
                recovery: *recovery,
                follow_up: *follow_up,
            });
        }
    }
    scenarios
}

/// Look a scenario up by name.
pub fn find(name: &str) -> Option<ScenarioSpec> {
    catalog().into_iter().find(|spec| spec.name == name)
}

/// Scenarios whose name contains `filter`; all of them when `None`.
pub fn select(filter: Option<&str>) -> Vec<ScenarioSpec> {
    catalog()
        .into_iter()
        .filter(|spec| filter.is_none_or(|f| spec.name.contains(f)))
        .collect()
}

/// Hosts a scenario works on, resolved before anything is injected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Targets {
    pub fault_hosts: HostSet,
    pub all_hosts: HostSet,
    pub leader: Option<String>,
}

impl Targets {
    fn hosts(&self, scope: HostScope) -> &HostSet {
        match scope {
            HostScope::Faulted => &self.fault_hosts,
            HostScope::AllNodes => &self.all_hosts,
        }
    }

    fn leader(&self) -> Result<&str> {
        self.leader
            .as_deref()
            .ok_or_else(|| ChaosError::Config("scenario has no leader target".into()))
    }
}

/// What a passing scenario observed.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub targets: Targets,
    pub sequence: Option<SequenceReport>,
    pub running_tasks: usize,
    pub duration: Duration,
}

/// Runs catalog entries against a [`Harness`].
pub struct ScenarioExecutor<'h, C, S> {
    harness: &'h Harness<C, S>,
}

impl<'h, C: ControlPlane, S: RemoteShell> ScenarioExecutor<'h, C, S> {
    pub fn new(harness: &'h Harness<C, S>) -> Self {
        Self { harness }
    }

    pub async fn run(&self, spec: &ScenarioSpec) -> Result<ScenarioReport> {
        let start = Instant::now();
        info!(scenario = %spec.name, operation = %spec.operation, fault = %spec.fault, "Starting scenario");

        let targets = self.resolve_targets(spec).await?;
        let sequence = if spec.is_planned() {
            let (operation, fault, recovery) = (spec.operation, spec.fault, spec.recovery);
            let targets = &targets;
            let planned = PlannedOperation::new(spec.name.clone(), stage(move || self.operate(operation)))
                .with_failure(stage(move || self.inject(fault, targets)))
                .with_recovery(stage(move || self.recover(recovery, targets)));
            Some(self.harness.sequencer().run(planned).await?)
        } else {
            self.inject(spec.fault, &targets)
                .await
                .map_err(|e| e.in_stage(Stage::Failure.as_str()))?;
            self.recover(spec.recovery, &targets)
                .await
                .map_err(|e| e.in_stage(Stage::Recovery.as_str()))?;
            None
        };

        self.recover(spec.follow_up, &targets)
            .await
            .map_err(|e| e.in_stage("follow-up"))?;

        let tasks = self
            .harness
            .health()
            .check_health(true)
            .await
            .map_err(|e| e.in_stage("health"))?;

        let duration = start.elapsed();
        info!(scenario = %spec.name, duration_secs = duration.as_secs(), "Scenario passed");
        Ok(ScenarioReport {
            name: spec.name.clone(),
            targets,
            sequence,
            running_tasks: tasks.len(),
            duration,
        })
    }

    async fn resolve_targets(&self, spec: &ScenarioSpec) -> Result<Targets> {
        let health = self.harness.health();
        let mut targets = Targets::default();

        if spec.needs_all_hosts() {
            targets.all_hosts = health.service_hosts().await?;
            require_hosts(&targets.all_hosts, &spec.name)?;
        }

        match spec.fault {
            Fault::KillDataProcess(Spread::One)
            | Fault::KillExecutor(Spread::One)
            | Fault::PartitionAgents(Spread::One) => {
                targets.fault_hosts.insert(health.node_host().await?);
            }
            Fault::KillDataProcess(Spread::All)
            | Fault::KillExecutor(Spread::All)
            | Fault::PartitionAgents(Spread::All) => {
                targets.fault_hosts = if targets.all_hosts.is_empty() {
                    health.service_hosts().await?
                } else {
                    targets.all_hosts.clone()
                };
                require_hosts(&targets.fault_hosts, &spec.name)?;
            }
            Fault::KillScheduler => {
                targets.fault_hosts.insert(health.scheduler_host().await?);
            }
            Fault::KillMasterLeader | Fault::KillZookeeperLeader | Fault::PartitionMaster(_) => {
                let leader = self.harness.control_plane.leader_ip().await?;
                targets.fault_hosts.insert(leader.clone());
                targets.leader = Some(leader);
            }
        }

        info!(
            scenario = %spec.name,
            hosts = ?targets.fault_hosts,
            leader = ?targets.leader,
            "Resolved scenario targets"
        );
        Ok(targets)
    }

    async fn operate(&self, operation: Operation) -> Result<()> {
        let operations = self.harness.operations();
        match operation {
            Operation::None => Ok(()),
            Operation::BumpCpu(delta) => operations.bump_cpu_count(delta).await.map(|_| ()),
            Operation::Cleanup => operations.run_cleanup().await,
            Operation::Repair => operations.run_repair().await,
        }
    }

    async fn inject(&self, fault: Fault, targets: &Targets) -> Result<()> {
        let faults = self.harness.faults();
        let hosts = &targets.fault_hosts;
        match fault {
            Fault::KillDataProcess(_) => faults.kill_on_hosts(patterns::CASSANDRA_DAEMON, hosts).await,
            Fault::KillScheduler => faults.kill_on_hosts(patterns::SCHEDULER, hosts).await,
            Fault::KillExecutor(_) => faults.kill_on_hosts(patterns::EXECUTOR, hosts).await,
            Fault::KillMasterLeader => faults.kill_on_hosts(patterns::MESOS_MASTER, hosts).await,
            Fault::KillZookeeperLeader => faults.kill_on_hosts(patterns::ZOOKEEPER, hosts).await,
            Fault::PartitionAgents(_) => faults.partition_agents_for_dwell(hosts).await,
            Fault::PartitionMaster(direction) => {
                faults
                    .partition_master_for_dwell(targets.leader()?, direction)
                    .await
            }
        }
    }

    async fn recover(&self, action: RecoveryAction, targets: &Targets) -> Result<()> {
        let recovery = self.harness.recovery();
        match action {
            RecoveryAction::None => Ok(()),
            RecoveryAction::RestartFailedAgents(scope) => recovery
                .recover_failed_agents(targets.hosts(scope))
                .await
                .map(|_| ()),
            RecoveryAction::AwaitLeaderChange => recovery
                .verify_leader_changed(targets.leader()?)
                .await
                .map(|_| ()),
            RecoveryAction::AwaitAdminRouter => {
                recovery.block_on_admin_router(targets.leader()?).await
            }
            RecoveryAction::RecoverPartitionedHosts => {
                recovery
                    .recover_hosts_from_partitioning(&targets.fault_hosts)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_size_and_unique_names() {
        let scenarios = catalog();
        assert_eq!(scenarios.len(), 40);
        let names: HashSet<_> = scenarios.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.len(), 40);
        assert_eq!(scenarios.iter().filter(|s| !s.is_planned()).count(), 13);
    }

    #[test]
    fn test_config_updates_alternate_cpu_direction() {
        let deltas: Vec<f64> = catalog()
            .iter()
            .filter_map(|s| match s.operation {
                Operation::BumpCpu(delta) => Some(delta),
                _ => None,
            })
            .collect();
        assert_eq!(deltas.len(), 9);
        assert_eq!(deltas[0], CPU_STEP);
        assert_eq!(deltas[1], -CPU_STEP);
        assert_eq!(deltas[8], CPU_STEP);
    }

    #[test]
    fn test_planned_master_kill_checks_leader_after_sequence() {
        for prefix in ["config_update", "cleanup", "repair"] {
            let spec = find(&format!("{prefix}_then_master_killed")).unwrap();
            assert_eq!(spec.recovery, RecoveryAction::None);
            assert_eq!(spec.follow_up, RecoveryAction::AwaitLeaderChange);
        }
    }

    #[test]
    fn test_zookeeper_standalone_variants() {
        let recovery = find("zk_killed_recovery").unwrap();
        assert_eq!(recovery.recovery, RecoveryAction::AwaitAdminRouter);
        let plain = find("zk_killed").unwrap();
        assert_eq!(plain.recovery, RecoveryAction::AwaitLeaderChange);
    }

    #[test]
    fn test_executor_kill_recovers_faulted_host_only() {
        let spec = find("repair_then_executor_killed").unwrap();
        assert_eq!(
            spec.recovery,
            RecoveryAction::RestartFailedAgents(HostScope::Faulted)
        );
        assert!(!spec.needs_all_hosts());
        assert!(find("cleanup_then_kill_task_in_node").unwrap().needs_all_hosts());
    }

    #[test]
    fn test_select_by_filter() {
        assert_eq!(select(Some("partition_master")).len(), 3);
        assert_eq!(select(Some("cleanup_then")).len(), 9);
        assert_eq!(select(None).len(), 40);
        assert!(find("no_such_scenario").is_none());
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(Operation::BumpCpu(-0.1).to_string(), "bump CPU -0.1");
        assert_eq!(
            Fault::KillDataProcess(Spread::One).to_string(),
            "kill CassandraDaemon on one node"
        );
        assert_eq!(
            Fault::PartitionMaster(PartitionDirection::Incoming).to_string(),
            "partition leader (incoming)"
        );
    }

    #[test]
    fn test_spec_serializes_tagged() {
        let spec = find("config_update_then_kill_task_in_node").unwrap();
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["operation"]["kind"], "bump_cpu");
        assert_eq!(json["fault"]["kind"], "kill_data_process");
        assert_eq!(json["fault"]["target"], "one");
    }
}
