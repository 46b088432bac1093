//! Scripted collaborators for tests.
//!
//! [`MockControlPlane`] and [`MockShell`] implement the collaborator traits
//! from [`crate::cluster`] without touching a network. Responses come from
//! [`Script`]s: each call pops the next scripted value, and once the script
//! is drained the last value keeps being returned. Every call is recorded so
//! tests can assert on what the suite did.

use crate::cluster::{ControlPlane, PackageManager, RemoteShell};
use crate::errors::{ChaosError, Result};
use crate::http::request_success;
use crate::types::{CommandResult, HttpReply, Phase, Plan, PlanStatus, ServiceTask, TASK_RUNNING_STATE};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Queue of scripted values; the last value is sticky.
#[derive(Debug)]
pub struct Script<T> {
    queue: Mutex<VecDeque<T>>,
    last: Mutex<Option<T>>,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
        }
    }
}

impl<T: Clone> Script<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            queue: Mutex::new(items.into_iter().collect()),
            last: Mutex::new(None),
        }
    }

    /// Next scripted value, or the last one handed out when drained.
    pub fn next(&self) -> Option<T> {
        let popped = self.queue.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(item) = popped {
            *last = Some(item.clone());
            return Some(item);
        }
        last.clone()
    }
}

/// A scripted control-plane reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Http(HttpReply),
    Transport(String),
    Authentication(String),
}

impl MockReply {
    /// 200 with the plan as JSON body.
    pub fn plan(plan: &Plan) -> Self {
        let body = serde_json::to_string(plan).unwrap_or_default();
        Self::Http(HttpReply::new(200, body))
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Http(HttpReply::new(status, body))
    }

    fn into_result(self, url: &str) -> Result<HttpReply> {
        match self {
            Self::Http(reply) if request_success(reply.status) => Ok(reply),
            Self::Http(reply) => Err(ChaosError::UnexpectedStatus {
                status: reply.status,
                url: url.to_string(),
            }),
            Self::Transport(msg) => Err(ChaosError::Transport(msg)),
            Self::Authentication(msg) => Err(ChaosError::Authentication(msg)),
        }
    }
}

/// A scripted leader lookup.
#[derive(Debug, Clone)]
pub enum MockLeader {
    Ip(String),
    AuthenticationError,
}

/// Call recorded by [`MockControlPlane`].
#[derive(Debug, Clone, PartialEq)]
pub enum ControlPlaneCall {
    Plan,
    StartCleanup(Vec<String>),
    StartRepair(Vec<String>),
    AppConfig,
    UpdateAppConfig(Value),
    ServiceTasks(String),
    LeaderIp,
    UnitHealth { unit: String, host: String },
    MasterMetadata(String),
}

/// Scripted [`ControlPlane`].
#[derive(Debug, Default)]
pub struct MockControlPlane {
    plans: Script<MockReply>,
    tasks: HashMap<String, Script<Vec<ServiceTask>>>,
    leaders: Script<MockLeader>,
    metadata: Script<Value>,
    unit_health: Mutex<i64>,
    app_config: Mutex<Value>,
    calls: Mutex<Vec<ControlPlaneCall>>,
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plans(mut self, replies: impl IntoIterator<Item = MockReply>) -> Self {
        self.plans = Script::new(replies);
        self
    }

    /// Script the active task lists of one framework.
    pub fn with_tasks(
        mut self,
        service: &str,
        snapshots: impl IntoIterator<Item = Vec<ServiceTask>>,
    ) -> Self {
        self.tasks.insert(service.to_string(), Script::new(snapshots));
        self
    }

    pub fn with_leaders(mut self, leaders: impl IntoIterator<Item = MockLeader>) -> Self {
        self.leaders = Script::new(leaders);
        self
    }

    pub fn with_metadata(mut self, documents: impl IntoIterator<Item = Value>) -> Self {
        self.metadata = Script::new(documents);
        self
    }

    pub fn with_app_config(self, config: Value) -> Self {
        *self.app_config.lock().unwrap() = config;
        self
    }

    pub fn with_unit_health(self, code: i64) -> Self {
        *self.unit_health.lock().unwrap() = code;
        self
    }

    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&ControlPlaneCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    /// Every app definition submitted through `update_app_config`.
    pub fn app_config_updates(&self) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                ControlPlaneCall::UpdateAppConfig(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ControlPlaneCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ControlPlane for MockControlPlane {
    async fn plan(&self) -> Result<HttpReply> {
        self.record(ControlPlaneCall::Plan);
        self.plans
            .next()
            .unwrap_or_else(|| MockReply::Transport("no scripted plan".into()))
            .into_result("mock://plan")
    }

    async fn start_cleanup(&self, nodes: &[String]) -> Result<HttpReply> {
        self.record(ControlPlaneCall::StartCleanup(nodes.to_vec()));
        Ok(HttpReply::new(200, "{}"))
    }

    async fn start_repair(&self, nodes: &[String]) -> Result<HttpReply> {
        self.record(ControlPlaneCall::StartRepair(nodes.to_vec()));
        Ok(HttpReply::new(200, "{}"))
    }

    async fn app_config(&self) -> Result<Value> {
        self.record(ControlPlaneCall::AppConfig);
        Ok(self.app_config.lock().unwrap().clone())
    }

    async fn update_app_config(&self, config: &Value) -> Result<HttpReply> {
        self.record(ControlPlaneCall::UpdateAppConfig(config.clone()));
        *self.app_config.lock().unwrap() = config.clone();
        Ok(HttpReply::new(200, "{}"))
    }

    async fn service_tasks(&self, service: &str) -> Result<Vec<ServiceTask>> {
        self.record(ControlPlaneCall::ServiceTasks(service.to_string()));
        Ok(self
            .tasks
            .get(service)
            .and_then(Script::next)
            .unwrap_or_default())
    }

    async fn leader_ip(&self) -> Result<String> {
        self.record(ControlPlaneCall::LeaderIp);
        match self.leaders.next() {
            Some(MockLeader::Ip(ip)) => Ok(ip),
            Some(MockLeader::AuthenticationError) => {
                Err(ChaosError::Authentication("token expired".into()))
            }
            None => Err(ChaosError::Transport("no scripted leader".into())),
        }
    }

    async fn unit_health(&self, unit: &str, host: &str) -> Result<i64> {
        self.record(ControlPlaneCall::UnitHealth {
            unit: unit.to_string(),
            host: host.to_string(),
        });
        Ok(*self.unit_health.lock().unwrap())
    }

    async fn master_metadata(&self, master_ip: &str) -> Result<Value> {
        self.record(ControlPlaneCall::MasterMetadata(master_ip.to_string()));
        Ok(self.metadata.next().unwrap_or(Value::Null))
    }
}

/// Command recorded by [`MockShell`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCall {
    pub host: String,
    pub command: String,
    /// Time since the shell was created.
    pub at: Duration,
}

#[derive(Debug, Clone)]
struct ShellRule {
    contains: String,
    host: Option<String>,
    exit_code: i32,
    stderr: String,
}

/// Scripted [`RemoteShell`]. Commands succeed unless a rule matches.
#[derive(Debug)]
pub struct MockShell {
    rules: Vec<ShellRule>,
    unreachable: HashSet<String>,
    calls: Mutex<Vec<ShellCall>>,
    created_at: Instant,
}

impl Default for MockShell {
    fn default() -> Self {
        Self::new()
    }
}

impl MockShell {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            unreachable: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            created_at: Instant::now(),
        }
    }

    /// Commands containing `contains` exit with `exit_code` on any host.
    pub fn fail_when(mut self, contains: &str, exit_code: i32, stderr: &str) -> Self {
        self.rules.push(ShellRule {
            contains: contains.to_string(),
            host: None,
            exit_code,
            stderr: stderr.to_string(),
        });
        self
    }

    /// Commands containing `contains` exit with `exit_code` on `host` only.
    pub fn fail_on_host(mut self, host: &str, contains: &str, exit_code: i32, stderr: &str) -> Self {
        self.rules.push(ShellRule {
            contains: contains.to_string(),
            host: Some(host.to_string()),
            exit_code,
            stderr: stderr.to_string(),
        });
        self
    }

    /// Connections to `host` fail.
    pub fn unreachable(mut self, host: &str) -> Self {
        self.unreachable.insert(host.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ShellCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands_on(&self, host: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.host == host)
            .map(|call| call.command.clone())
            .collect()
    }

    pub fn count_matching(&self, contains: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.command.contains(contains))
            .count()
    }
}

impl RemoteShell for MockShell {
    async fn run(&self, host: &str, command: &str) -> Result<CommandResult> {
        self.calls.lock().unwrap().push(ShellCall {
            host: host.to_string(),
            command: command.to_string(),
            at: self.created_at.elapsed(),
        });

        if self.unreachable.contains(host) {
            return Err(ChaosError::Transport(format!(
                "ssh: connect to host {host} port 22: Connection timed out"
            )));
        }

        let rule = self.rules.iter().find(|rule| {
            command.contains(&rule.contains)
                && rule.host.as_deref().is_none_or(|h| h == host)
        });

        Ok(match rule {
            Some(rule) => CommandResult {
                exit_code: rule.exit_code,
                stdout: String::new(),
                stderr: rule.stderr.clone(),
                duration: Duration::from_millis(5),
            },
            None => CommandResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::from_millis(5),
            },
        })
    }
}

/// Call recorded by [`MockPackages`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageCall {
    Install {
        package: String,
        options_file: Option<PathBuf>,
    },
    Uninstall(String),
}

/// Scripted [`PackageManager`].
#[derive(Debug, Default)]
pub struct MockPackages {
    fail_install: Option<String>,
    fail_uninstall: Option<String>,
    calls: Mutex<Vec<PackageCall>>,
}

impl MockPackages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_install(mut self, message: &str) -> Self {
        self.fail_install = Some(message.to_string());
        self
    }

    pub fn failing_uninstall(mut self, message: &str) -> Self {
        self.fail_uninstall = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<PackageCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl PackageManager for MockPackages {
    async fn install(&self, package: &str, options_file: Option<&Path>) -> Result<()> {
        self.calls.lock().unwrap().push(PackageCall::Install {
            package: package.to_string(),
            options_file: options_file.map(Path::to_path_buf),
        });
        match &self.fail_install {
            Some(message) => Err(ChaosError::Cli {
                command: format!("package install {package}"),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn uninstall(&self, package: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(PackageCall::Uninstall(package.to_string()));
        match &self.fail_uninstall {
            Some(message) => Err(ChaosError::Cli {
                command: format!("package uninstall {package}"),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Plan whose phases all carry `status`, with the given phase ids.
pub fn plan(phase_ids: &[&str], status: PlanStatus) -> Plan {
    Plan {
        phases: phase_ids
            .iter()
            .map(|id| Phase {
                id: id.to_string(),
                name: id.to_string(),
                steps: Vec::new(),
                status,
            })
            .collect(),
        errors: Vec::new(),
        status,
    }
}

/// One running task per host, named `node-<i>`.
pub fn running_tasks(hosts: &[&str]) -> Vec<ServiceTask> {
    hosts
        .iter()
        .enumerate()
        .map(|(i, host)| ServiceTask {
            id: format!("node-{i}__{i:04}"),
            name: format!("node-{i}"),
            state: TASK_RUNNING_STATE.to_string(),
            host: host.to_string(),
        })
        .collect()
}

/// Deployment app definition with `CASSANDRA_CPUS` set.
pub fn app_config_with_cpus(cpus: &str) -> Value {
    serde_json::json!({
        "id": "/cassandra",
        "cpus": 0.5,
        "env": { "CASSANDRA_CPUS": cpus, "NODES": "3" },
        "version": "2026-01-01T00:00:00.000Z"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_last_value_is_sticky() {
        let script = Script::new([1, 2]);
        assert_eq!(script.next(), Some(1));
        assert_eq!(script.next(), Some(2));
        assert_eq!(script.next(), Some(2));
    }

    #[test]
    fn test_empty_script_yields_none() {
        let script: Script<u8> = Script::default();
        assert_eq!(script.next(), None);
        assert_eq!(script.next(), None);
    }

    #[tokio::test]
    async fn test_mock_plan_rejects_unexpected_status() {
        let cp = MockControlPlane::new().with_plans([
            MockReply::status(503, "unavailable"),
            MockReply::status(404, "missing"),
        ]);

        assert_eq!(cp.plan().await.unwrap().status, 503);
        let err = cp.plan().await.unwrap_err();
        assert!(matches!(err, ChaosError::UnexpectedStatus { status: 404, .. }));
        assert_eq!(cp.count_calls(|c| *c == ControlPlaneCall::Plan), 2);
    }

    #[tokio::test]
    async fn test_mock_service_hosts_from_tasks() {
        let cp = MockControlPlane::new()
            .with_tasks("cassandra", [running_tasks(&["10.0.0.2", "10.0.0.1"])]);
        let hosts = cp.service_hosts("cassandra").await.unwrap();
        assert_eq!(
            hosts.into_iter().collect::<Vec<_>>(),
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]
        );
        assert!(cp.service_hosts("marathon").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mock_shell_rules() {
        let shell = MockShell::new()
            .fail_on_host("10.0.0.2", "kill", 1, "no such process")
            .unreachable("10.0.0.9");

        assert!(shell.run("10.0.0.1", "sudo kill -9 1").await.unwrap().success());
        let failed = shell.run("10.0.0.2", "sudo kill -9 1").await.unwrap();
        assert_eq!(failed.exit_code, 1);
        assert_eq!(failed.stderr, "no such process");
        assert!(shell.run("10.0.0.9", "true").await.unwrap_err().is_transient());
        assert_eq!(shell.count_matching("kill"), 2);
        assert_eq!(shell.commands_on("10.0.0.1").len(), 1);
    }
}
