//! The `dcos` command-line client.

use ccr_common::{ChaosError, PackageManager, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

pub const URL_KEY: &str = "core.dcos_url";
pub const TOKEN_KEY: &str = "core.dcos_acs_token";

/// Runs `dcos` subcommands.
#[derive(Debug, Clone)]
pub struct DcosCli {
    program: String,
}

impl Default for DcosCli {
    fn default() -> Self {
        Self::new("dcos")
    }
}

impl DcosCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run with `args` and return trimmed stdout; non-zero exits are errors.
    pub async fn run(&self, args: &[String]) -> Result<String> {
        let rendered = args.join(" ");
        debug!(command = %rendered, "Running cluster CLI");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| ChaosError::Cli {
                command: rendered.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ChaosError::Cli {
                command: rendered,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn config_value(&self, key: &str) -> Result<String> {
        let value = self.run(&config_show_args(key)).await?;
        if value.is_empty() {
            return Err(ChaosError::Config(format!("{key} is not set in the dcos CLI")));
        }
        Ok(value)
    }

    pub async fn cluster_url(&self) -> Result<String> {
        self.config_value(URL_KEY).await
    }

    pub async fn acs_token(&self) -> Result<String> {
        self.config_value(TOKEN_KEY).await
    }
}

impl PackageManager for DcosCli {
    async fn install(&self, package: &str, options_file: Option<&Path>) -> Result<()> {
        info!(package, "Installing package");
        self.run(&install_args(package, options_file)).await?;
        Ok(())
    }

    async fn uninstall(&self, package: &str) -> Result<()> {
        info!(package, "Uninstalling package");
        self.run(&uninstall_args(package)).await?;
        Ok(())
    }
}

fn config_show_args(key: &str) -> Vec<String> {
    vec!["config".into(), "show".into(), key.into()]
}

fn install_args(package: &str, options_file: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "package".to_string(),
        "install".to_string(),
        package.to_string(),
        "--yes".to_string(),
    ];
    if let Some(path) = options_file {
        args.push(format!("--options={}", path.display()));
    }
    args
}

fn uninstall_args(package: &str) -> Vec<String> {
    vec![
        "package".into(),
        "uninstall".into(),
        package.into(),
        "--yes".into(),
    ]
}
