//! Contracts for the external systems the suite drives.
//!
//! The scheduler, the orchestration platform and the remote shell are black
//! boxes. Everything the suite needs from them goes through these traits,
//! which keeps the protocol code testable against scripted mocks.

use crate::errors::Result;
use crate::types::{CommandResult, HostSet, HttpReply, ServiceTask};
use serde_json::Value;
use std::path::Path;

/// HTTP surface of the cluster: service API, deployment API, master state,
/// DNS and health endpoints.
///
/// Methods returning [`HttpReply`] have already checked the status against
/// [`crate::http::request_success`]; a status outside that set is an
/// [`crate::ChaosError::UnexpectedStatus`].
#[allow(async_fn_in_trait)]
pub trait ControlPlane {
    /// `GET /v1/plan` of the service under test.
    async fn plan(&self) -> Result<HttpReply>;

    /// `PUT /v1/cleanup/start` for the given nodes (`*` for all).
    async fn start_cleanup(&self, nodes: &[String]) -> Result<HttpReply>;

    /// `PUT /v1/repair/start` for the given nodes (`*` for all).
    async fn start_repair(&self, nodes: &[String]) -> Result<HttpReply>;

    /// Latest deployed app definition of the service scheduler.
    async fn app_config(&self) -> Result<Value>;

    /// Replace the scheduler app definition.
    async fn update_app_config(&self, config: &Value) -> Result<HttpReply>;

    /// Active tasks of a framework, with the host of each task's agent.
    async fn service_tasks(&self, service: &str) -> Result<Vec<ServiceTask>>;

    /// Hosts currently running tasks of `service`.
    async fn service_hosts(&self, service: &str) -> Result<HostSet> {
        Ok(self
            .service_tasks(service)
            .await?
            .into_iter()
            .map(|task| task.host)
            .collect())
    }

    /// IP of the current control-plane leader.
    async fn leader_ip(&self) -> Result<String>;

    /// Health code of a systemd unit on a node; 0 means healthy.
    async fn unit_health(&self, unit: &str, host: &str) -> Result<i64>;

    /// Admin router metadata document served by a master.
    async fn master_metadata(&self, master_ip: &str) -> Result<Value>;
}

/// Command execution on cluster nodes.
///
/// A non-zero exit is *not* an error at this level: the returned
/// [`CommandResult`] carries it and callers decide. Errors mean the command
/// could not be run at all.
#[allow(async_fn_in_trait)]
pub trait RemoteShell {
    async fn run(&self, host: &str, command: &str) -> Result<CommandResult>;
}

/// Package lifecycle of the service under test, as driven by the cluster CLI.
#[allow(async_fn_in_trait)]
pub trait PackageManager {
    /// Install `package`, optionally with an options file.
    async fn install(&self, package: &str, options_file: Option<&Path>) -> Result<()>;

    async fn uninstall(&self, package: &str) -> Result<()>;
}
