//! Configuration system for CCR.
//!
//! Configuration is layered:
//! - built-in defaults
//! - a TOML file (`--config <path>` or `<config dir>/ccr/config.toml`)
//! - `CCR_*` environment variables
//!
//! and validated once after all layers are applied.

pub mod env;

pub use env::{EnvError, EnvParser};

use crate::poll::{DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_BUDGET, SpinOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default number of Cassandra nodes in the service under test.
pub const DEFAULT_NODE_COUNT: u32 = 3;

/// Upper bound for every configured timing value.
pub const MAX_TIMING: Duration = Duration::from_secs(24 * 60 * 60);

/// Time a partitioned host stays cut off before it is reconnected.
pub const DEFAULT_PARTITION_DWELL: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid environment: {}", format_env_errors(.0))]
    Env(Vec<EnvError>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn format_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Full suite configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaosConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster URL (e.g. `https://dcos.example.com`). Read from the cluster
    /// CLI when unset.
    #[serde(default)]
    pub url: Option<String>,
    /// ACS token sent as `Authorization: token=<acs_token>`. Read from the
    /// cluster CLI when unset.
    #[serde(default)]
    pub acs_token: Option<String>,
    /// Verify TLS certificates of the cluster endpoints.
    #[serde(default)]
    pub verify_tls: bool,
    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout", with = "duration_str")]
    pub request_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            url: None,
            acs_token: None,
            verify_tls: false,
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service (framework and app) name.
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Package installed for the service.
    #[serde(default = "default_service_name")]
    pub package: String,
    /// Framework that runs the service scheduler.
    #[serde(default = "default_scheduler_framework")]
    pub scheduler_framework: String,
    /// Number of Cassandra nodes.
    #[serde(default = "default_node_count")]
    pub node_count: u32,
    /// Number of running tasks that counts as healthy. Defaults to `node_count`.
    #[serde(default)]
    pub expected_tasks: Option<u32>,
    /// Package options file passed to install.
    #[serde(default)]
    pub options_file: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            package: default_service_name(),
            scheduler_framework: default_scheduler_framework(),
            node_count: DEFAULT_NODE_COUNT,
            expected_tasks: None,
            options_file: None,
        }
    }
}

impl ServiceConfig {
    pub fn expected_tasks(&self) -> u32 {
        self.expected_tasks.unwrap_or(self.node_count)
    }
}

/// How unknown SSH host keys are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKeyPolicy {
    /// Refuse hosts missing from `known_hosts`.
    Strict,
    /// Record new hosts, refuse changed keys.
    #[default]
    Add,
    /// Trust any key.
    Accept,
}

impl HostKeyPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "strict" => Some(Self::Strict),
            "add" => Some(Self::Add),
            "accept" => Some(Self::Accept),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_user")]
    pub user: String,
    /// Private key; the SSH agent/config is used when unset.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// Master used as jump host to reach agents. Defaults to the cluster URL
    /// host.
    #[serde(default)]
    pub proxy_host: Option<String>,
    #[serde(default = "default_connect_timeout", with = "duration_str")]
    pub connect_timeout: Duration,
    #[serde(default)]
    pub host_keys: HostKeyPolicy,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            key_file: None,
            proxy_host: None,
            connect_timeout: default_connect_timeout(),
            host_keys: HostKeyPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Budget of every convergence poll.
    #[serde(default = "default_wait_budget", with = "duration_str")]
    pub wait_budget: Duration,
    #[serde(default = "default_poll_interval", with = "duration_str")]
    pub poll_interval: Duration,
    #[serde(default = "default_partition_dwell", with = "duration_str")]
    pub partition_dwell: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            wait_budget: DEFAULT_WAIT_BUDGET,
            poll_interval: DEFAULT_POLL_INTERVAL,
            partition_dwell: DEFAULT_PARTITION_DWELL,
        }
    }
}

impl TimingConfig {
    /// Asserting poll options with the configured budget and interval.
    pub fn spin_options(&self) -> SpinOptions {
        SpinOptions::new(self.wait_budget, self.poll_interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Also append logs to this file.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_service_name() -> String {
    "cassandra".to_string()
}

fn default_scheduler_framework() -> String {
    "marathon".to_string()
}

fn default_node_count() -> u32 {
    DEFAULT_NODE_COUNT
}

fn default_ssh_user() -> String {
    "core".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_wait_budget() -> Duration {
    DEFAULT_WAIT_BUDGET
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_partition_dwell() -> Duration {
    DEFAULT_PARTITION_DWELL
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Serde adapter for humantime durations ("300s", "1m 30s").
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(de::Error::custom)
    }
}

impl ChaosConfig {
    /// Default location of the config file.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "ccr", "ccr")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from file and environment, then validate.
    ///
    /// An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        let mut parser = EnvParser::new();
        config.apply_env(&mut parser);
        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `CCR_*` overrides.
    pub fn apply_env(&mut self, parser: &mut EnvParser) {
        if let Some(url) = parser.get_string("CLUSTER_URL") {
            self.cluster.url = Some(url);
        }
        if let Some(token) = parser.get_string("ACS_TOKEN") {
            self.cluster.acs_token = Some(token);
        }
        if let Some(verify) = parser.get_bool("VERIFY_TLS") {
            self.cluster.verify_tls = verify;
        }
        if let Some(timeout) = parser.get_duration("REQUEST_TIMEOUT") {
            self.cluster.request_timeout = timeout;
        }
        if let Some(name) = parser.get_string("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Some(package) = parser.get_string("PACKAGE_NAME") {
            self.service.package = package;
        }
        if let Some(count) = parser.get_u32_range("NODE_COUNT", 1, 1000) {
            self.service.node_count = count;
        }
        if let Some(tasks) = parser.get_u32_range("EXPECTED_TASKS", 1, 10_000) {
            self.service.expected_tasks = Some(tasks);
        }
        if let Some(options) = parser.get_path("OPTIONS_FILE") {
            self.service.options_file = Some(options);
        }
        if let Some(user) = parser.get_string("SSH_USER") {
            self.ssh.user = user;
        }
        if let Some(key) = parser.get_path("SSH_KEY_FILE") {
            self.ssh.key_file = Some(key);
        }
        if let Some(proxy) = parser.get_string("SSH_PROXY_HOST") {
            self.ssh.proxy_host = Some(proxy);
        }
        if let Some(policy) = parser
            .get_one_of("SSH_HOST_KEYS", &["strict", "add", "accept"])
            .and_then(HostKeyPolicy::parse)
        {
            self.ssh.host_keys = policy;
        }
        if let Some(budget) = parser.get_duration("WAIT_BUDGET") {
            self.timing.wait_budget = budget;
        }
        if let Some(interval) = parser.get_duration("POLL_INTERVAL") {
            self.timing.poll_interval = interval;
        }
        if let Some(dwell) = parser.get_duration("PARTITION_DWELL") {
            self.timing.partition_dwell = dwell;
        }
        if let Some(level) = parser.get_string("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = parser.get_one_of("LOG_FORMAT", &["pretty", "json"]) {
            self.logging.json = format == "json";
        }
        if let Some(file) = parser.get_path("LOG_FILE") {
            self.logging.file = Some(file);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::Invalid("service.name must not be empty".into()));
        }
        if self.service.node_count == 0 {
            return Err(ConfigError::Invalid("service.node_count must be at least 1".into()));
        }
        if self.timing.wait_budget.is_zero() {
            return Err(ConfigError::Invalid("timing.wait_budget must be positive".into()));
        }
        if self.timing.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("timing.poll_interval must be positive".into()));
        }
        for (name, value) in [
            ("timing.wait_budget", self.timing.wait_budget),
            ("timing.poll_interval", self.timing.poll_interval),
            ("timing.partition_dwell", self.timing.partition_dwell),
        ] {
            if value > MAX_TIMING {
                return Err(ConfigError::Invalid(format!(
                    "{name} ({}) exceeds {}",
                    humantime::format_duration(value),
                    humantime::format_duration(MAX_TIMING)
                )));
            }
        }
        if self.timing.poll_interval > self.timing.wait_budget {
            return Err(ConfigError::Invalid(format!(
                "timing.poll_interval ({}) exceeds timing.wait_budget ({})",
                humantime::format_duration(self.timing.poll_interval),
                humantime::format_duration(self.timing.wait_budget)
            )));
        }
        if let Some(url) = &self.cluster.url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "cluster.url must start with http:// or https://, got '{url}'"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::logging::{LogConfig, LogFormat};
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = ChaosConfig::default();
        assert_eq!(config.service.name, "cassandra");
        assert_eq!(config.service.node_count, 3);
        assert_eq!(config.service.expected_tasks(), 3);
        assert_eq!(config.ssh.user, "core");
        assert_eq!(config.timing.wait_budget, Duration::from_secs(300));
        assert_eq!(config.timing.partition_dwell, Duration::from_secs(20));
        assert!(!config.cluster.verify_tls);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_file() {
        let file = write_config(
            r#"
[cluster]
url = "https://dcos.example.com"

[service]
node_count = 5
expected_tasks = 6

[timing]
wait_budget = "10m"
poll_interval = "2s"
"#,
        );

        let config = ChaosConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cluster.url.as_deref(), Some("https://dcos.example.com"));
        assert_eq!(config.service.node_count, 5);
        assert_eq!(config.service.expected_tasks(), 6);
        assert_eq!(config.timing.wait_budget, Duration::from_secs(600));
        assert_eq!(config.timing.poll_interval, Duration::from_secs(2));
        assert_eq!(config.timing.partition_dwell, Duration::from_secs(20));
        assert_eq!(config.service.name, "cassandra");
    }

    #[test]
    fn test_bad_duration_is_parse_error() {
        let file = write_config("[timing]\nwait_budget = \"forever\"\n");
        let err = ChaosConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_explicit_file_is_io_error() {
        let err = ChaosConfig::load(Some(Path::new("/nonexistent/ccr.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_validate_rejects_interval_above_budget() {
        let mut config = ChaosConfig::default();
        config.timing.wait_budget = Duration::from_secs(1);
        config.timing.poll_interval = Duration::from_secs(2);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_caps_timing_values() {
        let mut config = ChaosConfig::default();
        config.timing.wait_budget = Duration::from_secs(u64::MAX / 2);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("wait_budget")));

        let mut config = ChaosConfig::default();
        config.timing.partition_dwell = MAX_TIMING + Duration::from_secs(1);
        assert!(config.validate().is_err());

        let mut config = ChaosConfig::default();
        config.timing.wait_budget = MAX_TIMING;
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_huge_env_wait_budget_is_rejected() {
        let file = write_config("");
        // SAFETY: env-mutating tests are serialized with #[serial].
        unsafe { std::env::set_var("CCR_WAIT_BUDGET", "9223372036854775807") };
        let result = ChaosConfig::load(Some(file.path()));
        // SAFETY: see above.
        unsafe { std::env::remove_var("CCR_WAIT_BUDGET") };

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    #[serial]
    fn test_env_log_format_switches_to_json() {
        let file = write_config("[logging]\njson = false\n");
        // SAFETY: env-mutating tests are serialized with #[serial].
        unsafe { std::env::set_var("CCR_LOG_FORMAT", "json") };
        let config = ChaosConfig::load(Some(file.path()));
        // SAFETY: see above.
        unsafe { std::env::remove_var("CCR_LOG_FORMAT") };

        let config = config.unwrap();
        assert!(config.logging.json);
        assert_eq!(LogConfig::from_config(&config.logging).format, LogFormat::Json);
    }

    #[test]
    #[serial]
    fn test_env_log_format_rejects_unknown_value() {
        let file = write_config("");
        // SAFETY: env-mutating tests are serialized with #[serial].
        unsafe { std::env::set_var("CCR_LOG_FORMAT", "xml") };
        let err = ChaosConfig::load(Some(file.path())).unwrap_err();
        // SAFETY: see above.
        unsafe { std::env::remove_var("CCR_LOG_FORMAT") };

        assert!(matches!(err, ConfigError::Env(errors) if errors.len() == 1));
    }

    #[test]
    fn test_host_key_policy_defaults_to_add() {
        assert_eq!(ChaosConfig::default().ssh.host_keys, HostKeyPolicy::Add);

        let file = write_config("[ssh]\nhost_keys = \"strict\"\n");
        let config = ChaosConfig::from_file(file.path()).unwrap();
        assert_eq!(config.ssh.host_keys, HostKeyPolicy::Strict);
    }

    #[test]
    #[serial]
    fn test_env_host_key_policy() {
        let file = write_config("");
        // SAFETY: env-mutating tests are serialized with #[serial].
        unsafe { std::env::set_var("CCR_SSH_HOST_KEYS", "accept") };
        let config = ChaosConfig::load(Some(file.path()));
        // SAFETY: see above.
        unsafe { std::env::remove_var("CCR_SSH_HOST_KEYS") };

        assert_eq!(config.unwrap().ssh.host_keys, HostKeyPolicy::Accept);
    }

    #[test]
    fn test_validate_rejects_zero_nodes_and_bad_url() {
        let mut config = ChaosConfig::default();
        config.service.node_count = 0;
        assert!(config.validate().is_err());

        let mut config = ChaosConfig::default();
        config.cluster.url = Some("dcos.example.com".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_spin_options_follow_timing() {
        let timing = TimingConfig {
            wait_budget: Duration::from_secs(42),
            poll_interval: Duration::from_secs(2),
            partition_dwell: Duration::from_secs(20),
        };
        let opts = timing.spin_options();
        assert_eq!(opts.wait_budget, Duration::from_secs(42));
        assert_eq!(opts.interval, Duration::from_secs(2));
        assert!(opts.assert_success);
    }

    #[test]
    fn test_roundtrip_through_toml_keeps_durations_readable() {
        let rendered = toml::to_string(&ChaosConfig::default()).unwrap();
        assert!(rendered.contains("wait_budget = \"5m\""));
        assert!(rendered.contains("partition_dwell = \"20s\""));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file_values() {
        let file = write_config("[service]\nnode_count = 5\n");
        // SAFETY: env-mutating tests are serialized with #[serial].
        unsafe {
            std::env::set_var("CCR_NODE_COUNT", "7");
            std::env::set_var("CCR_WAIT_BUDGET", "90s");
            std::env::set_var("CCR_CLUSTER_URL", "https://leader.example.com");
        }

        let config = ChaosConfig::load(Some(file.path())).unwrap();

        // SAFETY: see above.
        unsafe {
            std::env::remove_var("CCR_NODE_COUNT");
            std::env::remove_var("CCR_WAIT_BUDGET");
            std::env::remove_var("CCR_CLUSTER_URL");
        }

        assert_eq!(config.service.node_count, 7);
        assert_eq!(config.timing.wait_budget, Duration::from_secs(90));
        assert_eq!(
            config.cluster.url.as_deref(),
            Some("https://leader.example.com")
        );
    }

    #[test]
    #[serial]
    fn test_env_errors_are_collected() {
        let file = write_config("");
        // SAFETY: env-mutating tests are serialized with #[serial].
        unsafe {
            std::env::set_var("CCR_NODE_COUNT", "many");
            std::env::set_var("CCR_VERIFY_TLS", "sometimes");
        }

        let err = ChaosConfig::load(Some(file.path())).unwrap_err();

        // SAFETY: see above.
        unsafe {
            std::env::remove_var("CCR_NODE_COUNT");
            std::env::remove_var("CCR_VERIFY_TLS");
        }

        match err {
            ConfigError::Env(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected env errors, got {other:?}"),
        }
    }
}
