use std::sync::Arc;

use clap::Parser;
use colourado::{ColorPalette, PaletteType};
use futures::future::join_all;
use itertools::zip;

use muster_ssh::config::{Config, Mode, WorkerConfig};
use muster_ssh::error::MusterError;
use muster_ssh::host::get_nodes;
use muster_ssh::ops::{Fleet, FleetNode, StartWorkers, StopWorkers};
use muster_ssh::pool::{Dispatcher, FleetReport};
use muster_ssh::session::{SshTransport, Transport};

/// Connects one SSH session per node and assembles the fleet.
async fn connect_fleet(cli: &Config) -> Result<Fleet, MusterError> {
    let nodes = get_nodes(&cli.hosts_file);
    let colors = ColorPalette::new(nodes.len() as u32, PaletteType::Pastel, false).colors;
    let mut connecting = vec![];
    for (color, node) in zip(colors, nodes.iter().cloned()) {
        connecting.push(SshTransport::connect(node, color));
    }
    let mut fleet_nodes = Vec::with_capacity(nodes.len());
    for (node, transport) in zip(nodes, join_all(connecting).await) {
        fleet_nodes.push(FleetNode {
            node,
            transport: Arc::new(transport?) as Arc<dyn Transport>,
        });
    }
    let master = match &cli.master {
        Some(alias) => fleet_nodes
            .iter()
            .position(|n| &n.node.alias == alias)
            .unwrap_or_else(|| panic!("Master alias '{}' not in {}", alias, cli.hosts_file)),
        None => 0,
    };
    Ok(Fleet::new(fleet_nodes, master))
}

/// Prints the per-node outcomes. Returns whether every node succeeded.
fn print_report(report: &FleetReport) -> bool {
    let failures = report.failures();
    if failures.is_empty() {
        eprintln!("[muster] All {} nodes completed.", report.len());
        return true;
    }
    eprintln!("[muster] {} of {} nodes failed:", failures.len(), report.len());
    for outcome in failures {
        eprintln!("[muster]   {:?}", outcome);
    }
    false
}

async fn run_start(cli: &Config) -> Result<bool, MusterError> {
    let config = WorkerConfig::from_file(&cli.worker_file)?;
    // Build commands before connecting anywhere; configuration errors must
    // not leave half a fleet touched.
    let operation = StartWorkers::new(&config)?;
    let fleet = connect_fleet(cli).await?;
    let dispatcher = Dispatcher::new(cli.pool_size);
    let report = operation.run(&fleet, &dispatcher).await?;
    dispatcher.shutdown().await;
    Ok(print_report(&report))
}

async fn run_stop(cli: &Config) -> Result<bool, MusterError> {
    let config = WorkerConfig::from_file(&cli.worker_file)?;
    let operation = StopWorkers::new(&config);
    let fleet = connect_fleet(cli).await?;
    let dispatcher = Dispatcher::new(cli.pool_size);
    let report = operation.run(&fleet, &dispatcher).await;
    dispatcher.shutdown().await;
    Ok(print_report(&report))
}

async fn run_add(cli: &Config) -> Result<bool, MusterError> {
    let alias = cli
        .node
        .as_ref()
        .expect("Add mode needs --node <alias>.");
    let config = WorkerConfig::from_file(&cli.worker_file)?;
    let operation = StartWorkers::new(&config)?;
    let fleet = connect_fleet(cli).await?;
    let node = fleet
        .find(alias)
        .unwrap_or_else(|| panic!("Node alias '{}' not in {}", alias, cli.hosts_file));
    let status = operation.on_node_join(node).await?;
    if status.success() {
        eprintln!("[muster] Worker started on {}.", node.node);
        Ok(true)
    } else {
        eprintln!("[muster] Start on {} exited with {}.", node.node, status);
        Ok(false)
    }
}

#[tokio::main]
async fn main() -> Result<(), MusterError> {
    let cli = Config::parse();

    let all_ok = match cli.mode {
        Mode::Start => {
            eprintln!("[muster] Starting workers!");
            run_start(&cli).await?
        }
        Mode::Stop => {
            eprintln!("[muster] Stopping workers!");
            run_stop(&cli).await?
        }
        Mode::Add => run_add(&cli).await?,
    };

    if !all_ok {
        std::process::exit(1);
    }
    Ok(())
}
