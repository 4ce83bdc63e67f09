use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::Parser;
use netreplay::{
    message::NodeId,
    simulation::Simulator,
    topology::TopologyDescription,
    SimulationConfig,
};
use tracing::level_filters::LevelFilter;

/// Replays a network topology as a set of concurrently running node actors.
#[derive(clap::Parser, Debug)]
#[command(name = "netreplay", version)]
struct Cli {
    /// Node-link JSON topology to simulate.
    #[arg(long, env = "NETREPLAY_TOPOLOGY", default_value = "out/topology.json")]
    topology: PathBuf,
    /// Directory receiving one `<node>.log` file per node.
    #[arg(long, env = "NETREPLAY_OUT_DIR", default_value = "out/sim_logs")]
    out_dir: PathBuf,
    /// Optional TOML file with simulation timings.
    #[arg(long, env = "NETREPLAY_CONFIG")]
    config: Option<PathBuf>,
    /// Overrides the actors' inbox wait, in milliseconds.
    #[arg(long)]
    recv_timeout_ms: Option<u64>,
    /// Upper bound, in milliseconds, on each wait for the simulation to settle.
    #[arg(long, default_value_t = 5_000)]
    settle_ms: u64,
    /// Link to fail once the greetings have settled, as `A:B`. Repeatable.
    #[arg(long = "fail", value_parser = parse_link)]
    fail: Vec<(NodeId, NodeId)>,
    /// Fail the first link of the topology, in sorted order.
    #[arg(long)]
    fail_first: bool,
    /// Broadcast a PROBE message from every node after the failures.
    #[arg(long)]
    probe: bool,
    /// Log level; `RUST_LOG` directives still apply on top.
    #[arg(long)]
    log_level: Option<LevelFilter>,
}

fn parse_link(s: &str) -> Result<(NodeId, NodeId), String> {
    match s.split_once(':') {
        Some((a, b)) if !a.is_empty() && !b.is_empty() => Ok((NodeId::new(a), NodeId::new(b))),
        _ => Err(format!("expected <A>:<B>, got `{s}`")),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    netreplay::config::set_logger(cli.log_level);

    let mut config = match &cli.config {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(ms) = cli.recv_timeout_ms {
        config = config.with_recv_timeout(Duration::from_millis(ms));
    }

    let topology = TopologyDescription::load(&cli.topology)
        .with_context(|| format!("loading topology {}", cli.topology.display()))?;
    let mut sim = Simulator::build_with_config(&topology, config)?;
    let settle = Duration::from_millis(cli.settle_ms);

    sim.start_all()?;
    if !sim.wait_for_quiescence(settle) {
        tracing::warn!(?settle, "Greetings did not settle");
    }

    let mut failures = cli.fail.clone();
    if cli.fail_first {
        if let Some(link) = sim.links_up().into_iter().next() {
            let (a, b) = link.endpoints();
            failures.push((a.clone(), b.clone()));
        }
    }
    for (a, b) in &failures {
        if sim.inject_link_failure(a, b) {
            println!("Link down: {a} <-> {b}");
        }
    }

    if cli.probe {
        let ids: Vec<NodeId> = sim.node_ids().cloned().collect();
        for id in ids {
            let probe = netreplay::message::Message::custom("PROBE", id.clone(), "");
            sim.deliver_broadcast(&id, probe);
        }
        if !sim.wait_for_quiescence(settle) {
            tracing::warn!(?settle, "Probes did not settle");
        }
    }

    if !sim.stop_all() {
        tracing::warn!("Some actors did not exit; their logs are unavailable");
    }
    sim.dump_logs(&cli.out_dir)?;
    println!("Sim logs written to {}/", cli.out_dir.display());

    let stats = sim.stats();
    println!(
        "Messages: {} sent, {} delivered, {} dropped",
        stats.sent,
        stats.delivered,
        stats.total_dropped()
    );
    Ok(())
}
