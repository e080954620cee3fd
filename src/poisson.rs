use rand::Rng;

/// Event scheduler following a Poisson process whose rate may drift from
/// tick to tick.
///
/// Instead of running a Bernoulli trial every tick (numerically shaky for
/// the tiny per-tick rates mining produces), the process samples the next
/// arrival time directly from the exponential inter-arrival distribution
/// and fires when the clock crosses it.
#[derive(Debug, Clone, PartialEq)]
pub struct PoissonProcess {
    /// Absolute time of the next arrival. `None` until the first
    /// [`update`](PoissonProcess::update).
    next_event: Option<f64>,
    lambda: f64,
}

impl PoissonProcess {
    /// Relative rate change below which the current deadline is kept.
    /// Small difficulty drift should not endlessly reschedule the arrival.
    const RATE_TOLERANCE: f64 = 0.01;

    pub fn new(lambda: f64) -> Self {
        PoissonProcess { next_event: None, lambda }
    }

    #[inline]
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    #[inline]
    pub fn next_event(&self) -> Option<f64> {
        self.next_event
    }

    /// Inverse CDF of the exponential distribution: the inter-arrival time
    /// reached with cumulative probability `p` at rate `lambda`.
    fn quantile(p: f64, lambda: f64) -> f64 {
        -(1.0 - p).ln() / lambda
    }

    fn reschedule<R: Rng + ?Sized>(&mut self, now: f64, rng: &mut R) {
        let p = rng.gen::<f64>();
        self.next_event = Some(now + Self::quantile(p, self.lambda));
    }

    /// Advances the process to `now` at rate `lambda` (arrivals per time
    /// unit) and returns whether an arrival fired.
    ///
    /// The first call only schedules the initial arrival, and a rate
    /// change at or beyond [`RATE_TOLERANCE`](Self::RATE_TOLERANCE)
    /// reschedules the deadline without firing; neither counts as an
    /// arrival even if the old deadline has passed.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        now: f64,
        lambda: f64,
        rng: &mut R,
    ) -> bool {
        let is_first = self.next_event.is_none();
        let rate_changed = lambda != self.lambda
            && ((lambda - self.lambda) / self.lambda).abs()
                >= Self::RATE_TOLERANCE;
        let due = self.next_event.map_or(true, |at| now >= at);

        if due || rate_changed {
            self.lambda = lambda;
            self.reschedule(now, rng);
            return !is_first && !rate_changed;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::PoissonProcess;

    #[test]
    fn first_update_schedules_without_firing() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut process = PoissonProcess::new(0.5);

        assert!(!process.update(0.0, 0.5, &mut rng));
        let deadline = process.next_event().unwrap();
        assert!(deadline >= 0.0);

        // before the deadline nothing fires and nothing is resampled
        assert!(!process.update(deadline - 1e-9, 0.5, &mut rng));
        assert_eq!(process.next_event(), Some(deadline));
    }

    #[test]
    fn fires_only_on_deadline_crossings() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut process = PoissonProcess::new(1.0);

        process.update(0.0, 1.0, &mut rng);
        let deadline = process.next_event().unwrap();
        assert!(process.update(deadline, 1.0, &mut rng));

        // the next deadline was rescheduled past the old one
        assert!(process.next_event().unwrap() >= deadline);
    }

    #[test]
    fn rate_retune_reschedules_without_firing() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut process = PoissonProcess::new(1.0);

        process.update(0.0, 1.0, &mut rng);
        let deadline = process.next_event().unwrap();

        // a crossed deadline together with a >= 1% retune must not fire
        assert!(!process.update(deadline + 1.0, 2.0, &mut rng));
        assert_eq!(process.lambda(), 2.0);

        // drift below the tolerance keeps the deadline untouched
        let kept = process.next_event().unwrap();
        assert!(!process.update(kept - 1e-9, 2.0001, &mut rng));
        assert_eq!(process.next_event(), Some(kept));
        assert_eq!(process.lambda(), 2.0);
    }

    #[test]
    fn long_run_rate_matches_lambda() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut process = PoissonProcess::new(0.02);

        let ticks = 500_000u64;
        let mut fires = 0u64;
        for t in 0..ticks {
            if process.update(t as f64, 0.02, &mut rng) {
                fires += 1;
            }
        }

        let mean_gap = ticks as f64 / fires as f64;
        // expectation is 1 / lambda = 50 ticks; 10000 arrivals put the
        // sample mean within a few percent
        assert!((mean_gap - 50.0).abs() < 2.5, "mean gap {mean_gap}");
    }
}
