//! Shared fixtures for the scenario flow tests.

#![allow(dead_code)]

use ccr::Harness;
use ccr_common::mock::{MockControlPlane, MockShell, running_tasks};
use ccr_common::{ChaosConfig, HostSet, ServiceTask};
use std::time::Duration;

pub const NODES: [&str; 3] = ["10.0.0.1", "10.0.0.2", "10.0.0.3"];

pub const LEADER: &str = "10.0.0.100";

#[ctor::ctor]
fn init() {
    ccr_common::testing::init_test_logging();
}

/// Default configuration with a 10s wait budget and the stock 20s dwell.
pub fn config() -> ChaosConfig {
    let mut config = ChaosConfig::default();
    config.timing.wait_budget = Duration::from_secs(10);
    config.timing.poll_interval = Duration::from_secs(1);
    config
}

/// Polls one 10s tolerant health check makes before giving up.
pub const TOLERANT_POLLS: usize = 11;

pub fn healthy() -> Vec<ServiceTask> {
    running_tasks(&NODES)
}

/// Tasks with `host` missing.
pub fn without(host: &str) -> Vec<ServiceTask> {
    healthy().into_iter().filter(|t| t.host != host).collect()
}

pub fn hosts(items: &[&str]) -> HostSet {
    items.iter().map(|h| h.to_string()).collect()
}

pub fn harness(cp: MockControlPlane, shell: MockShell) -> Harness<MockControlPlane, MockShell> {
    Harness::new(cp, shell, config())
}
