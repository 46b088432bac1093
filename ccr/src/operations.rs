//! Operations that make the scheduler start new plan work.

use ccr_common::{ChaosError, ControlPlane, Result};
use serde_json::Value;
use tracing::info;

/// Environment key of the per-node CPU allocation in the scheduler app.
pub const CPU_ENV_KEY: &str = "CASSANDRA_CPUS";

/// Fields the deployment API sets itself and rejects on update.
const READ_ONLY_FIELDS: [&str; 2] = ["version", "versionInfo"];

/// Copy of `config` with the CPU allocation moved by `delta`, and the new
/// allocation.
pub fn bumped_config(config: &Value, delta: f64) -> Result<(Value, f64)> {
    let current = config
        .get("env")
        .and_then(|env| env.get(CPU_ENV_KEY))
        .ok_or_else(|| ChaosError::decode("app definition", format!("missing env.{CPU_ENV_KEY}")))?;

    let current = match current {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| ChaosError::decode(format!("env.{CPU_ENV_KEY}"), e))?,
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ChaosError::decode(format!("env.{CPU_ENV_KEY}"), "not a float"))?,
        other => {
            return Err(ChaosError::decode(
                format!("env.{CPU_ENV_KEY}"),
                format!("unexpected value {other}"),
            ));
        }
    };

    // Round to kill float noise like 0.6000000000000001.
    let updated = ((current + delta) * 1000.0).round() / 1000.0;

    let mut next = config.clone();
    if let Some(object) = next.as_object_mut() {
        for field in READ_ONLY_FIELDS {
            object.remove(field);
        }
    }
    if let Some(env) = next.get_mut("env").and_then(Value::as_object_mut) {
        env.insert(CPU_ENV_KEY.to_string(), Value::String(updated.to_string()));
    }
    Ok((next, updated))
}

pub struct Operations<'a, C> {
    control_plane: &'a C,
}

impl<'a, C: ControlPlane> Operations<'a, C> {
    pub fn new(control_plane: &'a C) -> Self {
        Self { control_plane }
    }

    /// Move the scheduler's CPU allocation by `delta` and submit the updated
    /// app definition. Returns the new allocation.
    pub async fn bump_cpu_count(&self, delta: f64) -> Result<f64> {
        let config = self.control_plane.app_config().await?;
        let (next, cpus) = bumped_config(&config, delta)?;
        let reply = self.control_plane.update_app_config(&next).await?;
        info!(delta, cpus, status = reply.status, "Submitted CPU update");
        Ok(cpus)
    }

    /// Start cleanup on all nodes.
    pub async fn run_cleanup(&self) -> Result<()> {
        let reply = self.control_plane.start_cleanup(&all_nodes()).await?;
        info!(status = reply.status, "Cleanup started");
        Ok(())
    }

    /// Start repair on all nodes.
    pub async fn run_repair(&self) -> Result<()> {
        let reply = self.control_plane.start_repair(&all_nodes()).await?;
        info!(status = reply.status, "Repair started");
        Ok(())
    }
}

fn all_nodes() -> Vec<String> {
    vec!["*".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccr_common::mock::{ControlPlaneCall, MockControlPlane, app_config_with_cpus};

    #[test]
    fn test_bumped_config_adds_delta_as_string() {
        let (next, cpus) = bumped_config(&app_config_with_cpus("0.5"), 0.1).unwrap();
        assert_eq!(cpus, 0.6);
        assert_eq!(next["env"][CPU_ENV_KEY], "0.6");
        assert_eq!(next["env"]["NODES"], "3");
    }

    #[test]
    fn test_bumped_config_negative_delta() {
        let (next, _) = bumped_config(&app_config_with_cpus("0.6"), -0.1).unwrap();
        assert_eq!(next["env"][CPU_ENV_KEY], "0.5");
    }

    #[test]
    fn test_bumped_config_strips_version() {
        let (next, _) = bumped_config(&app_config_with_cpus("1"), 0.1).unwrap();
        assert!(next.get("version").is_none());
        assert_eq!(next["id"], "/cassandra");
    }

    #[test]
    fn test_bumped_config_rejects_missing_or_bad_cpus() {
        let missing = serde_json::json!({"id": "/cassandra", "env": {}});
        assert!(bumped_config(&missing, 0.1).is_err());

        let bad = app_config_with_cpus("lots");
        assert!(matches!(
            bumped_config(&bad, 0.1),
            Err(ChaosError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_bump_cpu_count_submits_update() {
        let cp = MockControlPlane::new().with_app_config(app_config_with_cpus("0.5"));
        let ops = Operations::new(&cp);

        assert_eq!(ops.bump_cpu_count(0.1).await.unwrap(), 0.6);
        assert_eq!(ops.bump_cpu_count(-0.1).await.unwrap(), 0.5);

        let updates = cp.app_config_updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0]["env"][CPU_ENV_KEY], "0.6");
    }

    #[tokio::test]
    async fn test_cleanup_and_repair_target_all_nodes() {
        let cp = MockControlPlane::new();
        let ops = Operations::new(&cp);

        ops.run_cleanup().await.unwrap();
        ops.run_repair().await.unwrap();

        assert_eq!(
            cp.calls(),
            vec![
                ControlPlaneCall::StartCleanup(vec!["*".into()]),
                ControlPlaneCall::StartRepair(vec!["*".into()]),
            ]
        );
    }
}
