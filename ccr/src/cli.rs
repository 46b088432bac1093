//! Command-line interface.

use anyhow::{Context, Result, bail};
use ccr::scenarios::{self, ScenarioSpec};
use ccr::{DcosCli, Harness, HttpControlPlane, SshOptions, SshShell, SuiteOptions, SuiteRunner};
use ccr_common::{ChaosConfig, ControlPlane, HostSet, LogConfig, init_logging};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "ccr")]
#[command(author, version, about = "Cassandra recovery chaos suite")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "CCR_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the scenario catalog
    List {
        /// Only scenarios whose name contains this text
        #[arg(long)]
        filter: Option<String>,
    },

    /// Run named scenarios against the installed service
    Run {
        #[arg(required = true)]
        names: Vec<String>,

        /// Reinstall the service first
        #[arg(long)]
        reinstall: bool,
    },

    /// Reinstall the service, run the suite, uninstall
    Suite {
        /// Only scenarios whose name contains this text
        #[arg(long)]
        filter: Option<String>,

        #[arg(long)]
        skip_install: bool,

        #[arg(long)]
        keep_installed: bool,
    },

    /// Show the current service plan
    Plan,

    /// Show running service tasks
    Health,

    /// Show service hosts, scheduler host and control-plane leader
    Hosts,

    /// Restart agents on hosts that lost their service task
    Recover {
        /// Hosts to check (defaults to the hosts running the service)
        hosts: Vec<String>,

        /// Treat hosts as partitioned: restart erlang and agent unconditionally
        #[arg(long)]
        partitioned: bool,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = ChaosConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let mut log_config = LogConfig::from_config(&config.logging).with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    match cli.command {
        Commands::List { filter } => {
            list(&scenarios::select(filter.as_deref()), cli.json)?;
            Ok(())
        }
        Commands::Run { names, reinstall } => {
            let specs = names
                .iter()
                .map(|name| {
                    scenarios::find(name)
                        .with_context(|| format!("unknown scenario {name:?}; see `ccr list`"))
                })
                .collect::<Result<Vec<_>>>()?;
            let options = SuiteOptions {
                skip_install: !reinstall,
                keep_installed: true,
            };
            run_suite(config, &specs, &options, cli.json).await
        }
        Commands::Suite {
            filter,
            skip_install,
            keep_installed,
        } => {
            let specs = scenarios::select(filter.as_deref());
            if specs.is_empty() {
                bail!("no scenario matches the filter");
            }
            let options = SuiteOptions {
                skip_install,
                keep_installed,
            };
            run_suite(config, &specs, &options, cli.json).await
        }
        Commands::Plan => {
            let harness = connect(config).await?;
            let plan = harness
                .plans()
                .fetch()
                .await
                .context("plan endpoint returned no plan")?;
            if cli.json {
                print_json(&plan)?;
            } else {
                println!("Plan: {}", plan.status);
                for phase in &plan.phases {
                    println!("  {} [{}] {}", phase.id, phase.status, phase.name);
                    for step in &phase.steps {
                        println!("    {} [{}] {}", step.name, step.status, step.message);
                    }
                }
            }
            Ok(())
        }
        Commands::Health => {
            let harness = connect(config).await?;
            let expected = harness.config.service.expected_tasks();
            let tasks = harness.health().check_health(false).await?;
            if cli.json {
                print_json(&tasks)?;
            } else {
                for task in &tasks {
                    println!("{}  {}  {}", task.name, task.host, task.state);
                }
                println!("{} of {expected} tasks running", tasks.len());
            }
            if tasks.len() != expected as usize {
                bail!("service is not healthy");
            }
            Ok(())
        }
        Commands::Hosts => {
            let harness = connect(config).await?;
            let health = harness.health();
            let hosts = HostsView {
                service_hosts: health.service_hosts().await?,
                scheduler_host: health.scheduler_host().await.ok(),
                leader: harness.control_plane.leader_ip().await.ok(),
            };
            if cli.json {
                print_json(&hosts)?;
            } else {
                for host in &hosts.service_hosts {
                    println!("node       {host}");
                }
                if let Some(host) = &hosts.scheduler_host {
                    println!("scheduler  {host}");
                }
                if let Some(host) = &hosts.leader {
                    println!("leader     {host}");
                }
            }
            Ok(())
        }
        Commands::Recover { hosts, partitioned } => {
            let harness = connect(config).await?;
            let hosts: HostSet = if hosts.is_empty() {
                harness.health().service_hosts().await?
            } else {
                hosts.into_iter().collect()
            };
            let recovery = harness.recovery();
            if partitioned {
                recovery.recover_hosts_from_partitioning(&hosts).await?;
                info!(hosts = hosts.len(), "Partitioned hosts recovered");
            } else {
                let restarted = recovery.recover_failed_agents(&hosts).await?;
                info!(restarted = restarted.len(), "Failed agents recovered");
            }
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct HostsView {
    service_hosts: HostSet,
    scheduler_host: Option<String>,
    leader: Option<String>,
}

/// Build the live harness, reading the cluster URL and token from the dcos
/// CLI when the configuration leaves them unset.
async fn connect(config: ChaosConfig) -> Result<Harness<HttpControlPlane, SshShell>> {
    let cli = DcosCli::default();
    let url = match &config.cluster.url {
        Some(url) => url.clone(),
        None => cli
            .cluster_url()
            .await
            .context("cluster URL not configured and not readable from the dcos CLI")?,
    };
    let token = match &config.cluster.acs_token {
        Some(token) => token.clone(),
        None => cli
            .acs_token()
            .await
            .context("ACS token not configured and not readable from the dcos CLI")?,
    };

    let proxy = reqwest::Url::parse(&url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string));
    let control_plane = HttpControlPlane::new(&url, &token, &config.cluster, &config.service)?;
    let shell = SshShell::new(SshOptions::from_config(&config.ssh, proxy));
    info!(cluster = %url, service = %config.service.name, "Connected harness");
    Ok(Harness::new(control_plane, shell, config))
}

async fn run_suite(
    config: ChaosConfig,
    specs: &[ScenarioSpec],
    options: &SuiteOptions,
    json: bool,
) -> Result<()> {
    let harness = connect(config).await?;
    let packages = DcosCli::default();
    let runner = SuiteRunner::new(&harness, &packages);
    let report = runner.run(specs, options).await?;

    if json {
        print_json(&report)?;
    } else {
        println!("{}", report.render_text());
    }
    if !report.all_passed() {
        bail!("{} of {} scenarios failed", report.failed(), report.outcomes.len());
    }
    Ok(())
}

fn list(specs: &[ScenarioSpec], json: bool) -> Result<()> {
    if json {
        return print_json(&specs);
    }
    for spec in specs {
        println!(
            "{:<40} operation={} fault={} recovery={}",
            spec.name, spec.operation, spec.fault, spec.recovery
        );
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
