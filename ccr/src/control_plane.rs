//! HTTP control plane over the cluster's admin router.

use ccr_common::config::{ClusterConfig, ServiceConfig};
use ccr_common::http::{is_ok_status, request_success};
use ccr_common::{ChaosError, ControlPlane, HttpReply, Result, ServiceTask};
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::debug;

/// [`ControlPlane`] talking to a live cluster.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: Client,
    base_url: String,
    token: String,
    service: String,
}

impl HttpControlPlane {
    pub fn new(
        cluster_url: &str,
        token: &str,
        cluster: &ClusterConfig,
        service: &ServiceConfig,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(cluster.request_timeout)
            .danger_accept_invalid_certs(!cluster.verify_tls)
            .build()
            .map_err(|e| ChaosError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: cluster_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            service: service.name.clone(),
        })
    }

    pub fn service_url(&self, path: &str) -> String {
        format!("{}/service/{}/v1/{path}", self.base_url, self.service)
    }

    pub fn marathon_url(&self, path: &str) -> String {
        format!("{}/marathon/v2/{path}", self.base_url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("token={}", self.token))
    }

    /// Send a request and check the status against the tolerated set.
    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<HttpReply> {
        let mut builder = self.authorized(self.client.request(method.clone(), url));
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ChaosError::Transport(format!("{method} {url}: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ChaosError::Transport(format!("{method} {url}: {e}")))?;
        debug!(%method, url, status, "Control plane reply");

        if !request_success(status) {
            return Err(ChaosError::UnexpectedStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(HttpReply::new(status, body))
    }

    /// GET a JSON document; only 2xx counts, 401 is an authentication error.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let reply = self.send(Method::GET, url, None).await?;
        if reply.status == 401 {
            return Err(ChaosError::Authentication(format!("GET {url} returned 401")));
        }
        if !is_ok_status(reply.status) {
            return Err(ChaosError::UnexpectedStatus {
                status: reply.status,
                url: url.to_string(),
            });
        }
        reply.json().map_err(|e| ChaosError::decode(url, e))
    }
}

impl ControlPlane for HttpControlPlane {
    async fn plan(&self) -> Result<HttpReply> {
        self.send(Method::GET, &self.service_url("plan"), None).await
    }

    async fn start_cleanup(&self, nodes: &[String]) -> Result<HttpReply> {
        let body = json!({ "nodes": nodes });
        self.send(Method::PUT, &self.service_url("cleanup/start"), Some(&body))
            .await
    }

    async fn start_repair(&self, nodes: &[String]) -> Result<HttpReply> {
        let body = json!({ "nodes": nodes });
        self.send(Method::PUT, &self.service_url("repair/start"), Some(&body))
            .await
    }

    async fn app_config(&self) -> Result<Value> {
        let app = format!("apps/{}", self.service);
        let versions: AppVersions = self
            .get_json(&self.marathon_url(&format!("{app}/versions")))
            .await?;
        let latest = versions
            .versions
            .first()
            .ok_or_else(|| ChaosError::decode("app versions", "no versions listed"))?;
        self.get_json(&self.marathon_url(&format!("{app}/versions/{latest}")))
            .await
    }

    async fn update_app_config(&self, config: &Value) -> Result<HttpReply> {
        let url = self.marathon_url(&format!("apps/{}", self.service));
        self.send(Method::PUT, &url, Some(config)).await
    }

    async fn service_tasks(&self, service: &str) -> Result<Vec<ServiceTask>> {
        let state: MasterState = self
            .get_json(&format!("{}/mesos/master/state", self.base_url))
            .await?;
        Ok(state.service_tasks(service))
    }

    async fn leader_ip(&self) -> Result<String> {
        let url = format!("{}/mesos_dns/v1/hosts/leader.mesos", self.base_url);
        let records: Vec<DnsRecord> = self.get_json(&url).await?;
        records
            .into_iter()
            .next()
            .map(|record| record.ip)
            .ok_or_else(|| ChaosError::decode("leader record", "empty answer"))
    }

    async fn unit_health(&self, unit: &str, host: &str) -> Result<i64> {
        let url = format!(
            "{}/system/health/v1/units/{unit}/nodes/{host}",
            self.base_url
        );
        let health: UnitHealth = self.get_json(&url).await?;
        Ok(health.health)
    }

    async fn master_metadata(&self, master_ip: &str) -> Result<Value> {
        self.get_json(&format!("http://{master_ip}/metadata")).await
    }
}

#[derive(Debug, Deserialize)]
struct AppVersions {
    versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    ip: String,
}

#[derive(Debug, Deserialize)]
struct UnitHealth {
    health: i64,
}

/// The parts of `/mesos/master/state` used for task and host discovery.
#[derive(Debug, Default, Deserialize)]
pub struct MasterState {
    #[serde(default)]
    frameworks: Vec<FrameworkState>,
    #[serde(default)]
    slaves: Vec<AgentState>,
}

#[derive(Debug, Deserialize)]
struct FrameworkState {
    name: String,
    #[serde(default)]
    tasks: Vec<TaskState>,
}

#[derive(Debug, Deserialize)]
struct TaskState {
    id: String,
    name: String,
    state: String,
    slave_id: String,
}

#[derive(Debug, Deserialize)]
struct AgentState {
    id: String,
    hostname: String,
}

impl MasterState {
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| ChaosError::decode("master state", e))
    }

    /// Active tasks of every framework named `service`, with agent hostnames.
    pub fn service_tasks(&self, service: &str) -> Vec<ServiceTask> {
        let hosts: HashMap<&str, &str> = self
            .slaves
            .iter()
            .map(|agent| (agent.id.as_str(), agent.hostname.as_str()))
            .collect();

        self.frameworks
            .iter()
            .filter(|framework| framework.name == service)
            .flat_map(|framework| &framework.tasks)
            .filter_map(|task| {
                let host = hosts.get(task.slave_id.as_str())?;
                Some(ServiceTask {
                    id: task.id.clone(),
                    name: task.name.clone(),
                    state: task.state.clone(),
                    host: host.to_string(),
                })
            })
            .collect()
    }
}
