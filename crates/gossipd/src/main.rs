//! gossipd - in-process gossip cluster simulation
//!
//! Runs a handful of gossip actors over an in-memory network and reports
//! whether membership and custom event state converged.

use clap::Parser;
use gossipd::config::Config;
use gossipd::sim;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();

    // Initialize logging
    let default_level = if config.verbose { "gossipd=debug" } else { "gossipd=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = config.log_format == "json";
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    info!("gossipd v{} - gossip cluster simulation", env!("CARGO_PKG_VERSION"));
    info!(
        nodes = config.nodes,
        rounds = config.rounds,
        fanout = config.fanout,
        "Starting simulation"
    );

    let report = match sim::run(&config).await {
        Ok(report) => report,
        Err(e) => {
            error!("Simulation failed: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    for node in &report.nodes {
        info!(
            member = %node.id,
            members = node.members,
            suspects = node.suspects,
            leader = ?node.leader.as_ref().map(|id| id.to_string()),
            overflows = node.overflows,
            "Final view"
        );
    }
    info!(
        member = %report.crashed,
        confirmed_by = report.nodes.iter().filter(|n| n.crash_confirmed).count(),
        "Crashed node"
    );

    if report.converged() {
        info!("Cluster converged");
        ExitCode::SUCCESS
    } else {
        warn!("Cluster did not converge");
        ExitCode::FAILURE
    }
}
