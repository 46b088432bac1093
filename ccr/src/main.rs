//! Cassandra Recovery Chaos - CLI
//!
//! Runs recovery scenarios against a live cluster and reports which ones
//! left the service healthy.

#![forbid(unsafe_code)]

#[cfg(unix)]
mod cli;

#[cfg(unix)]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}

#[cfg(not(unix))]
fn main() {
    eprintln!("ccr drives cluster nodes over SSH and needs a unix host");
    std::process::exit(1);
}
