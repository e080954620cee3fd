/// Smallest difficulty a block can be minted at.
pub const MIN_DIFFICULTY: u64 = 1;

/// Difficulty used when a mint request carries none, and the difficulty of
/// genesis.
pub const INIT_DIFFICULTY: u64 = 100;

/// Normalization constant relating hashrate to difficulty: a lone miner
/// whose hashrate times this constant equals the difficulty mines at
/// exactly the target block time.
pub const DIFFICULTY_SCALE: f64 = 1000.0;

/// Number of blocks between difficulty retargets.
pub const RETARGET_INTERVAL: u64 = 50;

/// Exponent damping each retarget step, so one adjustment only closes a
/// fifth of the gap to the target block time.
pub const RETARGET_EXPONENT: f64 = 0.2;

/// Tunable simulation parameters. Read fresh every tick, so adjustments to
/// a running simulation take effect on the next tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Target interval between blocks, in simulated seconds.
    pub block_time_s: f64,
    /// Propagation delay of every edge, in simulated seconds.
    pub edge_delay_s: f64,
    /// Hashrate assumed for miners that do not declare their own.
    pub default_hashrate: f64,
    /// Ticks advanced per [`Simulation::step`](crate::simulation::Simulation::step).
    pub speedup: u32,
    /// Simulated ticks per second; fixes the tick/seconds conversion.
    pub ticks_per_second: u32,
    /// Per-vertex, per-tick probability of rebroadcasting the current tip
    /// to every neighbor regardless of what they are believed to know.
    /// Heals partitions left by lost handshakes.
    pub resync_probability: f64,
}

impl SimConfig {
    /// Target block interval in ticks.
    #[inline]
    pub fn block_time_ticks(&self) -> f64 {
        self.block_time_s * self.ticks_per_second as f64
    }

    /// Edge propagation delay in whole ticks, rounded down.
    #[inline]
    pub fn edge_delay_ticks(&self) -> u64 {
        (self.edge_delay_s * self.ticks_per_second as f64).floor() as u64
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            block_time_s: 5.0,
            edge_delay_s: 1.0,
            default_hashrate: 1.0,
            speedup: 1,
            ticks_per_second: 20,
            resync_probability: 1.0 / 10_000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SimConfig;

    #[test]
    fn tick_conversions() {
        let config = SimConfig::default();
        assert_eq!(config.block_time_ticks(), 100.0);
        assert_eq!(config.edge_delay_ticks(), 20);

        let sub_tick = SimConfig { edge_delay_s: 0.04, ..config };
        assert_eq!(sub_tick.edge_delay_ticks(), 0);
    }
}
