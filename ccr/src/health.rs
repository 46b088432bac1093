//! Service health and host discovery.

use ccr_common::config::ServiceConfig;
use ccr_common::{ChaosError, ControlPlane, HostSet, Result, ServiceTask, SpinOptions, Verdict, spin};
use tracing::{debug, info};

/// Polls the orchestration master for the service under test.
pub struct HealthProber<'a, C> {
    control_plane: &'a C,
    service: &'a ServiceConfig,
    options: SpinOptions,
}

impl<'a, C: ControlPlane> HealthProber<'a, C> {
    pub fn new(control_plane: &'a C, service: &'a ServiceConfig, options: SpinOptions) -> Self {
        Self {
            control_plane,
            service,
            options,
        }
    }

    /// Wait until the number of running service tasks equals the expected
    /// count, and return those tasks.
    ///
    /// Tolerant mode returns whatever was running at the deadline.
    pub async fn check_health(&self, assert_success: bool) -> Result<Vec<ServiceTask>> {
        let control_plane = self.control_plane;
        let service = self.service.name.as_str();
        let expected = self.service.expected_tasks() as usize;
        let options = self.options.clone().asserting(assert_success);

        let outcome = spin(
            "service health",
            &options,
            move || async move { running_tasks(control_plane, service).await },
            |tasks: &Vec<ServiceTask>| {
                let running = tasks.len();
                Verdict::new(
                    running == expected,
                    format!(
                        "Service did not become healthy: {running} of {expected} tasks running"
                    ),
                )
            },
        )
        .await?;

        if outcome.converged {
            info!(service, tasks = outcome.value.len(), "Service healthy");
        }
        Ok(outcome.value)
    }

    /// Wait until the service runs on exactly `node_count` hosts and return
    /// them.
    pub async fn wait_for_node_hosts(&self) -> Result<HostSet> {
        let control_plane = self.control_plane;
        let service = self.service.name.as_str();
        let node_count = self.service.node_count as usize;

        let outcome = spin(
            "node hosts",
            &self.options,
            move || async move {
                control_plane
                    .service_hosts(service)
                    .await
                    .unwrap_or_default()
            },
            |hosts: &HostSet| {
                Verdict::new(
                    hosts.len() == node_count,
                    format!("Expected {node_count} hosts, found {}", hosts.len()),
                )
            },
        )
        .await?;
        Ok(outcome.value)
    }

    /// One host running a service node.
    pub async fn node_host(&self) -> Result<String> {
        let hosts = self.wait_for_node_hosts().await?;
        hosts
            .into_iter()
            .next()
            .ok_or_else(|| ChaosError::Config("service runs on no hosts".into()))
    }

    /// Every host currently running a service task.
    pub async fn service_hosts(&self) -> Result<HostSet> {
        self.control_plane.service_hosts(&self.service.name).await
    }

    /// Host running the service scheduler under the deployment framework.
    pub async fn scheduler_host(&self) -> Result<String> {
        let framework = self.service.scheduler_framework.as_str();
        let tasks = self.control_plane.service_tasks(framework).await?;
        let host = tasks
            .iter()
            .find(|task| task.name == self.service.name)
            .or_else(|| tasks.first())
            .map(|task| task.host.clone())
            .ok_or_else(|| {
                ChaosError::Config(format!(
                    "no {framework} task found for scheduler of {}",
                    self.service.name
                ))
            })?;
        debug!(framework, host = %host, "Resolved scheduler host");
        Ok(host)
    }
}

async fn running_tasks<C: ControlPlane>(control_plane: &C, service: &str) -> Vec<ServiceTask> {
    match control_plane.service_tasks(service).await {
        Ok(tasks) => tasks.into_iter().filter(ServiceTask::is_running).collect(),
        Err(e) => {
            debug!(service, error = %e, "Task listing failed");
            Vec::new()
        }
    }
}
