use std::{error::Error, time::Instant};

use log::LevelFilter;
use simple_logger::SimpleLogger;

use consensus_sim::prelude::*;

const RELAYS: usize = 8;
const HONEST_MINERS: usize = 3;
const ATTACKER_HASHRATE: f64 = 2.0;
const TICKS: u64 = 200_000;
const REPLICAS: usize = 8;
const SNAPSHOTS: u64 = 10;

fn main() -> Result<(), Box<dyn Error>> {
    SimpleLogger::new().with_level(LevelFilter::Info).init()?;
    let start = Instant::now();

    // Relays first, then the honest miners, then one selfish miner holding
    // 40% of the network hashrate.
    let mut builder = Simulation::builder().seed(90);
    for id in 0..RELAYS {
        builder = builder.add_relay(id);
    }
    for id in RELAYS..RELAYS + HONEST_MINERS {
        builder = builder.add_miner(id, Honest::new());
    }
    let attacker = RELAYS + HONEST_MINERS;
    builder = builder.add_miner_with_hashrate(
        attacker,
        Selfish::new(),
        ATTACKER_HASHRATE,
    );

    // Ring backbone so the graph starts connected.
    let count = attacker + 1;
    for id in 0..count {
        builder = builder.add_edge(id, (id + 1) % count);
    }

    let mut sim = builder.build()?;
    for id in 0..count {
        sim.connect_random(id, 2)?;
    }
    let template = sim.clone();

    println!("{}", Metrics::csv_header());
    for _ in 0..SNAPSHOTS {
        sim.run(TICKS / SNAPSHOTS);
        println!("{}", sim.metrics().csv_row());
    }
    println!("\n{}\n", sim.metrics());

    // The same network replayed under independent seeds.
    let runs = SimulationGroup::new(template)
        .replicas(REPLICAS)
        .ticks(TICKS)
        .base_seed(100)
        .run_all();
    if let Some(summary) = GroupSummary::from_runs(&runs) {
        println!("{}", summary);
    }

    println!("Elapsed time: {:.4} secs", start.elapsed().as_secs_f64());

    Ok(())
}
