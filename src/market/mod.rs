pub mod calibration;
pub mod correlation;
pub mod process;

pub use process::{
    advance, advance_with_shock, simulate_path, FlavorProcessState, ProcessParams,
    DEFAULT_PRICE_FLOOR,
};

use crate::errors::{invalid, EngineResult};
use crate::market::correlation::CorrelationFactor;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use smallvec::SmallVec;

/// What happened to one flavor on one step.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub price: f64,
    pub jump: f64,
}

/// The multi-flavor market. Owns every flavor's process state and the random stream.
///
/// Given the same flavors, correlation and seed, the whole price path is reproducible.
/// Parameters are checked here, once; `step` itself cannot fail.
pub struct Market<R: Rng = ChaCha8Rng> {
    flavors: Vec<FlavorProcessState>,
    correlation: Option<CorrelationFactor>,
    day: u64,
    rng: R,
    /// Scratch for the per-step diffusion shocks (allocated once)
    shocks: Vec<f64>,
}

impl Market<ChaCha8Rng> {
    /// Market driven by a seeded ChaCha8 stream (stable across platforms).
    pub fn seeded(
        flavors: Vec<FlavorProcessState>,
        correlation: Option<&[f64]>,
        seed: u64,
    ) -> EngineResult<Self> {
        Self::with_rng(flavors, correlation, ChaCha8Rng::seed_from_u64(seed))
    }
}

impl<R: Rng> Market<R> {
    /// `correlation` is an optional row-major n x n matrix over `flavors`.
    pub fn with_rng(
        flavors: Vec<FlavorProcessState>,
        correlation: Option<&[f64]>,
        rng: R,
    ) -> EngineResult<Self> {
        if flavors.is_empty() {
            return Err(invalid("market needs at least one flavor"));
        }
        let mut seen = std::collections::HashSet::new();
        for f in &flavors {
            f.validate()?;
            if !seen.insert(f.name.as_str()) {
                return Err(invalid(format!("duplicate flavor {}", f.name)));
            }
        }

        let n = flavors.len();
        let correlation = correlation
            .map(|m| CorrelationFactor::from_matrix(m, n))
            .transpose()?;

        tracing::info!(
            flavors = n,
            correlated = correlation.is_some(),
            "market initialized"
        );

        Ok(Self {
            flavors,
            correlation,
            day: 0,
            rng,
            shocks: vec![0.0; n],
        })
    }

    /// Advance every flavor exactly once by `dt` days.
    ///
    /// All diffusion shocks are drawn first, then correlated (if configured),
    /// then applied flavor by flavor. An identity correlation therefore reproduces
    /// the uncorrelated path bit for bit.
    pub fn step(&mut self, dt: f64) -> SmallVec<[StepOutcome; 4]> {
        for z in self.shocks.iter_mut() {
            *z = self.rng.sample(StandardNormal);
        }
        if let Some(factor) = &self.correlation {
            factor.correlate(&mut self.shocks);
        }

        let mut outcomes = SmallVec::new();
        for (i, flavor) in self.flavors.iter_mut().enumerate() {
            let next = advance_with_shock(flavor, dt, self.shocks[i], &mut self.rng);
            outcomes.push(StepOutcome {
                index: i,
                price: next.spot,
                jump: next.last_jump,
            });
            *flavor = next;
        }
        self.day += 1;
        outcomes
    }

    #[inline]
    pub fn day(&self) -> u64 {
        self.day
    }

    #[inline]
    pub fn flavors(&self) -> &[FlavorProcessState] {
        &self.flavors
    }

    pub fn flavor(&self, name: &str) -> Option<&FlavorProcessState> {
        self.flavors.iter().find(|f| f.name == name)
    }

    /// Immutable spot snapshot for valuation.
    #[inline]
    pub fn spot(&self, name: &str) -> Option<f64> {
        self.flavor(name).map(|f| f.spot)
    }

    #[inline]
    pub fn is_correlated(&self) -> bool {
        self.correlation.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::calibration::default_flavors;

    fn run(market: &mut Market, days: usize) -> Vec<Vec<f64>> {
        (0..days)
            .map(|_| market.step(1.0).iter().map(|o| o.price).collect())
            .collect()
    }

    #[test]
    fn test_seeded_market_is_reproducible() {
        let mut a = Market::seeded(default_flavors().unwrap(), None, 42).unwrap();
        let mut b = Market::seeded(default_flavors().unwrap(), None, 42).unwrap();
        assert_eq!(run(&mut a, 250), run(&mut b, 250));
        assert_eq!(a.day(), 250);
        assert!(a.flavors().iter().all(|f| f.day == 250));
    }

    #[test]
    fn test_identity_correlation_matches_uncorrelated() {
        let identity = [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        let mut plain = Market::seeded(default_flavors().unwrap(), None, 11).unwrap();
        let mut corr = Market::seeded(default_flavors().unwrap(), Some(&identity), 11).unwrap();
        assert!(corr.is_correlated());
        assert_eq!(run(&mut plain, 100), run(&mut corr, 100));
    }

    #[test]
    fn test_strong_correlation_moves_together() {
        let params = ProcessParams {
            long_run_mean: 10.0,
            reversion_speed: 0.0,
            volatility: 0.2,
            jump_probability: 0.0,
            jump_size: 0.0,
            floor: DEFAULT_PRICE_FLOOR,
        };
        let flavors = vec![
            FlavorProcessState::new("a", 10.0, params).unwrap(),
            FlavorProcessState::new("b", 10.0, params).unwrap(),
        ];
        let mut market = Market::seeded(flavors, Some(&[1.0, 0.95, 0.95, 1.0]), 3).unwrap();
        let mut prev = [10.0, 10.0];
        let mut same_sign = 0;
        for _ in 0..500 {
            let out = market.step(1.0);
            let da = out[0].price - prev[0];
            let db = out[1].price - prev[1];
            if da * db > 0.0 {
                same_sign += 1;
            }
            prev = [out[0].price, out[1].price];
        }
        assert!(same_sign > 400, "only {same_sign}/500 co-moves");
    }

    #[test]
    fn test_construction_errors() {
        assert!(Market::seeded(Vec::new(), None, 1).is_err());
        let mut flavors = default_flavors().unwrap();
        let dup = flavors[0].clone();
        flavors.push(dup);
        assert!(Market::seeded(flavors, None, 1).is_err());
        let two_by_two = [1.0, 0.0, 0.0, 1.0];
        assert!(Market::seeded(default_flavors().unwrap(), Some(&two_by_two), 1).is_err());
    }

    #[test]
    fn test_spot_lookup() {
        let market = Market::seeded(default_flavors().unwrap(), None, 1).unwrap();
        assert_eq!(market.spot("vanilla"), Some(2.5));
        assert_eq!(market.spot("durian"), None);
    }
}
