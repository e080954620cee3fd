/*!
Point-in-time summaries of a running simulation.

[`Metrics`] is a cheap snapshot: it borrows nothing, so it can be collected
every few ticks for live display, or once at the end of a run. Its
[`Display`] implementation prints a human-readable status block; the
`csv_*` methods emit one machine-readable line per snapshot.
*/

use std::fmt::{self, Display};

use crate::{
    block::{Tick, TipRole},
    network::VertexId,
    simulation::Simulation,
    utils::median_of_floats,
};

/// Floating point precision of displayed metrics.
pub const FLOAT_PRECISION_DIGITS: usize = 6;

/// Measurement windows (in blocks) for the block-time estimates.
const BLOCK_TIME_WINDOWS: [u64; 3] = [50, 200, 1000];

/// Snapshot of chain-level statistics at a given tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    /// The tick this snapshot was taken at.
    pub time: Tick,
    /// Height of the canonical tip.
    pub height: u64,
    /// Every block minted so far, canonical or not.
    pub total_blocks: usize,
    /// Fraction of minted blocks off the canonical chain.
    pub orphan_rate: f64,
    /// Measured block time in simulated seconds over the last 50, 200, and
    /// 1000 blocks. `None` while the chain is at genesis.
    pub block_time_s: [Option<f64>; 3],
    /// Difficulty at the canonical tip.
    pub difficulty: u64,
    /// Vertices holding the canonical tip as their public tip.
    pub tip_node_holders: u32,
    /// Vertices holding the canonical tip as their mining tip.
    pub tip_miner_holders: u32,
    /// Effective hashrate of every miner vertex, in ascending id order.
    pub miner_hashrates: Vec<(VertexId, f64)>,
}

impl Metrics {
    /// Collects a snapshot from the simulation's current state.
    pub fn collect(sim: &Simulation) -> Self {
        let chain = sim.chain();
        let tip = chain.canonical_tip();
        let tip_data = &chain[tip];
        let seconds_per_tick =
            1.0 / sim.config().ticks_per_second as f64;

        let block_time_s = BLOCK_TIME_WINDOWS.map(|window| {
            chain
                .measured_block_time(tip, window)
                .map(|ticks| ticks * seconds_per_tick)
        });

        let miner_hashrates = sim
            .nodes()
            .filter_map(|(vk, node)| {
                node.miner_state().map(|miner| {
                    let rate = miner
                        .hashrate
                        .unwrap_or(sim.config().default_hashrate);
                    (vk, rate)
                })
            })
            .collect();

        Metrics {
            time: sim.time(),
            height: tip_data.block.height,
            total_blocks: chain.block_count(),
            orphan_rate: chain.orphan_rate(),
            block_time_s,
            difficulty: tip_data.block.difficulty,
            tip_node_holders: tip_data.holder_count(TipRole::Node),
            tip_miner_holders: tip_data.holder_count(TipRole::Miner),
            miner_hashrates,
        }
    }

    /// Header matching [`Metrics::csv_row`].
    pub fn csv_header() -> String {
        "time,height,total_blocks,orphan_rate,\
         block_time_50,block_time_200,block_time_1000,difficulty"
            .into()
    }

    /// This snapshot as one comma-separated line. Unavailable block times
    /// are left empty.
    pub fn csv_row(&self) -> String {
        let times: Vec<String> = self
            .block_time_s
            .iter()
            .map(|t| match t {
                Some(t) => format!("{:.*}", FLOAT_PRECISION_DIGITS, t),
                None => String::new(),
            })
            .collect();

        format!(
            "{},{},{},{:.*},{},{},{},{}",
            self.time,
            self.height,
            self.total_blocks,
            FLOAT_PRECISION_DIGITS,
            self.orphan_rate,
            times[0],
            times[1],
            times[2],
            self.difficulty,
        )
    }
}

impl Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Tick {}: height {}, {} blocks total",
            self.time, self.height, self.total_blocks
        )?;
        writeln!(f, "Orphan rate: {:.2}%", self.orphan_rate * 100.0)?;

        let times: Vec<String> = self
            .block_time_s
            .iter()
            .map(|t| match t {
                Some(t) => format!("{:.2}s", t),
                None => "-".into(),
            })
            .collect();
        writeln!(
            f,
            "Block time (50/200/1000): {} | {} | {}",
            times[0], times[1], times[2]
        )?;
        writeln!(f, "Difficulty: {}", self.difficulty)?;
        write!(
            f,
            "Tip held by {} nodes, {} miners",
            self.tip_node_holders, self.tip_miner_holders
        )
    }
}

/// Aggregate statistics over the replicas of a
/// [`SimulationGroup`](crate::simulation::SimulationGroup) run.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub runs: usize,
    pub mean_height: f64,
    pub mean_orphan_rate: f64,
    pub median_orphan_rate: f64,
    /// Mean 200-block block time over the runs that measured one.
    pub mean_block_time_s: Option<f64>,
}

impl GroupSummary {
    /// Summarizes a batch of per-run snapshots. `None` for an empty batch.
    pub fn from_runs(runs: &[Metrics]) -> Option<Self> {
        if runs.is_empty() {
            return None;
        }
        let n = runs.len() as f64;

        let orphan_rates: Vec<f64> =
            runs.iter().map(|m| m.orphan_rate).collect();
        let block_times: Vec<f64> =
            runs.iter().filter_map(|m| m.block_time_s[1]).collect();

        Some(GroupSummary {
            runs: runs.len(),
            mean_height: runs.iter().map(|m| m.height as f64).sum::<f64>()
                / n,
            mean_orphan_rate: orphan_rates.iter().sum::<f64>() / n,
            median_orphan_rate: median_of_floats(orphan_rates),
            mean_block_time_s: if block_times.is_empty() {
                None
            } else {
                Some(
                    block_times.iter().sum::<f64>()
                        / block_times.len() as f64,
                )
            },
        })
    }
}

impl Display for GroupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} runs", self.runs)?;
        writeln!(f, "Mean height: {:.1}", self.mean_height)?;
        writeln!(
            f,
            "Orphan rate: mean {:.4}, median {:.4}",
            self.mean_orphan_rate, self.median_orphan_rate
        )?;
        match self.mean_block_time_s {
            Some(t) => write!(f, "Mean block time (200): {:.2}s", t),
            None => write!(f, "Mean block time (200): -"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{GroupSummary, Metrics};
    use crate::network::VertexId;

    fn snapshot(height: u64, orphan_rate: f64) -> Metrics {
        Metrics {
            time: 100,
            height,
            total_blocks: height as usize + 1,
            orphan_rate,
            block_time_s: [Some(5.0), Some(5.5), None],
            difficulty: 100,
            tip_node_holders: 3,
            tip_miner_holders: 1,
            miner_hashrates: vec![(VertexId::from(0), 1.0)],
        }
    }

    #[test]
    fn csv_row_matches_header_shape() {
        let metrics = snapshot(10, 0.25);
        let columns = Metrics::csv_header().split(',').count();
        assert_eq!(metrics.csv_row().split(',').count(), columns);

        // the missing 1000-block estimate stays an empty field
        assert!(metrics.csv_row().contains(",,"));
    }

    #[test]
    fn group_summary_aggregates() {
        let runs =
            vec![snapshot(10, 0.1), snapshot(20, 0.2), snapshot(30, 0.6)];
        let summary = GroupSummary::from_runs(&runs).unwrap();

        assert_eq!(summary.runs, 3);
        assert_eq!(summary.mean_height, 20.0);
        assert!((summary.mean_orphan_rate - 0.3).abs() < 1e-12);
        assert_eq!(summary.median_orphan_rate, 0.2);
        assert_eq!(summary.mean_block_time_s, Some(5.5));

        assert!(GroupSummary::from_runs(&[]).is_none());
    }
}
