use crate::errors::{invalid, EngineResult};
use rand::Rng;
use rand_distr::StandardNormal;

/// Default strictly-positive floor for simulated prices.
pub const DEFAULT_PRICE_FLOOR: f64 = 0.05;

/// Calibrated constants of one flavor's mean-reverting jump-diffusion.
///
/// Time is measured in simulated days: `reversion_speed` and `jump_probability`
/// are per day, and `volatility` scales sqrt(dt) with dt in days.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProcessParams {
    pub long_run_mean: f64,
    pub reversion_speed: f64,
    pub volatility: f64,
    pub jump_probability: f64,
    /// Jumps move price by spot * U[-1, 1] * jump_size
    pub jump_size: f64,
    #[serde(default = "default_floor")]
    pub floor: f64,
}

fn default_floor() -> f64 {
    DEFAULT_PRICE_FLOOR
}

impl ProcessParams {
    /// Configuration check, run once at market initialization.
    pub fn validate(&self) -> EngineResult<()> {
        if !self.long_run_mean.is_finite() || self.long_run_mean <= 0.0 {
            return Err(invalid(format!("long-run mean must be positive, got {}", self.long_run_mean)));
        }
        if !self.reversion_speed.is_finite() || self.reversion_speed < 0.0 {
            return Err(invalid(format!(
                "reversion speed must be >= 0, got {}",
                self.reversion_speed
            )));
        }
        if !self.volatility.is_finite() || self.volatility < 0.0 {
            return Err(invalid(format!("volatility must be >= 0, got {}", self.volatility)));
        }
        if !(0.0..=1.0).contains(&self.jump_probability) {
            return Err(invalid(format!(
                "jump probability must be in [0, 1], got {}",
                self.jump_probability
            )));
        }
        if !(0.0..=1.0).contains(&self.jump_size) {
            return Err(invalid(format!("jump size must be in [0, 1], got {}", self.jump_size)));
        }
        if !self.floor.is_finite() || self.floor <= 0.0 {
            return Err(invalid(format!("price floor must be positive, got {}", self.floor)));
        }
        Ok(())
    }
}

/// One underlying's live state. Mutated once per simulated day, by the simulator only.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FlavorProcessState {
    pub name: String,
    pub spot: f64,
    /// Steps applied since market initialization
    #[serde(default)]
    pub day: u64,
    /// Jump added on the most recent step (0 when none fired)
    #[serde(default)]
    pub last_jump: f64,
    pub params: ProcessParams,
}

impl FlavorProcessState {
    pub fn new(name: impl Into<String>, spot: f64, params: ProcessParams) -> EngineResult<Self> {
        let state = Self {
            name: name.into(),
            spot,
            day: 0,
            last_jump: 0.0,
            params,
        };
        state.validate()?;
        Ok(state)
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.params
            .validate()
            .map_err(|e| invalid(format!("flavor {}: {e}", self.name)))?;
        if !self.spot.is_finite() || self.spot <= 0.0 {
            return Err(invalid(format!("flavor {}: spot must be positive, got {}", self.name, self.spot)));
        }
        Ok(())
    }
}

/// Advance one flavor by `dt` days.
///
/// new = max(floor, S + kappa * (mean - S) * dt + sigma * sqrt(dt) * Z + jump)
///
/// Total over validated state: any non-finite intermediate lands on the floor.
/// A non-finite or non-positive dt leaves the price where it is.
#[inline]
pub fn advance<R: Rng>(
    state: &FlavorProcessState,
    dt: f64,
    rng: &mut R,
) -> FlavorProcessState {
    let z: f64 = rng.sample(StandardNormal);
    advance_with_shock(state, dt, z, rng)
}

/// Same step with the diffusion shock supplied by the caller (correlated draws).
/// The jump component still comes from `rng`.
pub fn advance_with_shock<R: Rng>(
    state: &FlavorProcessState,
    dt: f64,
    z: f64,
    rng: &mut R,
) -> FlavorProcessState {
    let dt = if dt.is_finite() && dt > 0.0 { dt } else { 0.0 };
    let p = &state.params;
    let spot = state.spot;

    let drift = p.reversion_speed * (p.long_run_mean - spot) * dt;
    let diffusion = p.volatility * dt.sqrt() * z;

    // Always consume the roll so paths stay aligned across calibrations
    let roll: f64 = rng.gen();
    let jump = if roll < (p.jump_probability * dt).min(1.0) {
        spot * rng.gen_range(-1.0..=1.0) * p.jump_size
    } else {
        0.0
    };

    let raw = spot + drift + diffusion + jump;
    let next = if raw.is_finite() && raw > p.floor {
        raw
    } else {
        tracing::trace!(flavor = %state.name, raw, floor = p.floor, "price clamped to floor");
        p.floor
    };

    FlavorProcessState {
        name: state.name.clone(),
        spot: next,
        day: state.day + 1,
        last_jump: jump,
        params: state.params,
    }
}

/// Replay a single flavor's path from a seed. Used for regression and replays.
pub fn simulate_path(
    initial: &FlavorProcessState,
    dt: f64,
    steps: usize,
    seed: u64,
) -> EngineResult<Vec<f64>> {
    use rand::SeedableRng;

    initial.validate()?;
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
    let mut state = initial.clone();
    let mut path = Vec::with_capacity(steps);
    for _ in 0..steps {
        state = advance(&state, dt, &mut rng);
        path.push(state.spot);
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn scenario_params() -> ProcessParams {
        ProcessParams {
            long_run_mean: 2.5,
            reversion_speed: 0.3,
            volatility: 0.35,
            jump_probability: 0.02,
            jump_size: 0.3,
            floor: DEFAULT_PRICE_FLOOR,
        }
    }

    #[test]
    fn test_ten_thousand_steps_stay_positive_and_bounded() {
        let start = FlavorProcessState::new("vanilla", 2.5, scenario_params()).unwrap();
        let path = simulate_path(&start, 1.0, 10_000, 7).unwrap();
        assert_eq!(path.len(), 10_000);
        assert!(path.iter().all(|&p| p >= DEFAULT_PRICE_FLOOR && p > 0.0));
        let mean = path.iter().sum::<f64>() / path.len() as f64;
        assert!((mean - 2.5).abs() < 0.5, "path mean {mean} drifted away from 2.5");
    }

    #[test]
    fn test_same_seed_same_path() {
        let start = FlavorProcessState::new("mint", 2.5, scenario_params()).unwrap();
        let a = simulate_path(&start, 1.0, 500, 99).unwrap();
        let b = simulate_path(&start, 1.0, 500, 99).unwrap();
        let c = simulate_path(&start, 1.0, 500, 100).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_deterministic_parts() {
        // No noise, no jumps: pure exponential-ish pull toward the mean
        let params = ProcessParams {
            volatility: 0.0,
            jump_probability: 0.0,
            ..scenario_params()
        };
        let state = FlavorProcessState::new("chocolate", 4.5, params).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let next = advance(&state, 1.0, &mut rng);
        assert!((next.spot - (4.5 + 0.3 * (2.5 - 4.5))).abs() < 1e-12);
        assert_eq!(next.day, 1);
        assert_eq!(next.last_jump, 0.0);
    }

    #[test]
    fn test_certain_jump_is_bounded_by_size() {
        let params = ProcessParams {
            volatility: 0.0,
            reversion_speed: 0.0,
            jump_probability: 1.0,
            jump_size: 0.5,
            ..scenario_params()
        };
        let mut state = FlavorProcessState::new("strawberry", 2.0, params).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..100 {
            let before = state.spot;
            state = advance(&state, 1.0, &mut rng);
            assert!(state.last_jump.abs() <= 0.5 * before + 1e-12);
        }
    }

    #[test]
    fn test_floor_clamps_crash() {
        let params = ProcessParams {
            volatility: 0.0,
            reversion_speed: 0.0,
            jump_probability: 0.0,
            ..scenario_params()
        };
        let state = FlavorProcessState::new("mint", 0.2, params).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let next = advance_with_shock(&state, 1.0, -1e6, &mut rng);
        assert_eq!(next.spot, DEFAULT_PRICE_FLOOR);
    }

    #[test]
    fn test_zero_or_bad_dt_keeps_price() {
        let state = FlavorProcessState::new("vanilla", 3.0, scenario_params()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        assert_eq!(advance(&state, 0.0, &mut rng).spot, 3.0);
        assert_eq!(advance(&state, f64::NAN, &mut rng).spot, 3.0);
        assert_eq!(advance(&state, -2.0, &mut rng).spot, 3.0);
    }

    #[test]
    fn test_invalid_params_rejected_at_init() {
        let bad = [
            ProcessParams { volatility: -0.1, ..scenario_params() },
            ProcessParams { reversion_speed: -1.0, ..scenario_params() },
            ProcessParams { jump_probability: 1.5, ..scenario_params() },
            ProcessParams { jump_probability: -0.1, ..scenario_params() },
            ProcessParams { long_run_mean: 0.0, ..scenario_params() },
            ProcessParams { floor: 0.0, ..scenario_params() },
        ];
        for params in bad {
            assert!(FlavorProcessState::new("x", 2.5, params).is_err(), "{params:?}");
        }
        assert!(FlavorProcessState::new("x", 0.0, scenario_params()).is_err());
    }

    proptest! {
        #[test]
        fn prop_price_stays_positive(
            seed in any::<u64>(),
            vol in 0.0..3.0f64,
            kappa in 0.0..1.0f64,
            jump_p in 0.0..=1.0f64,
            jump_size in 0.0..=1.0f64,
            start in 0.05..20.0f64,
        ) {
            let params = ProcessParams {
                long_run_mean: 2.5,
                reversion_speed: kappa,
                volatility: vol,
                jump_probability: jump_p,
                jump_size,
                floor: DEFAULT_PRICE_FLOOR,
            };
            let state = FlavorProcessState::new("p", start, params).unwrap();
            let path = simulate_path(&state, 1.0, 200, seed).unwrap();
            prop_assert!(path.iter().all(|&p| p.is_finite() && p >= DEFAULT_PRICE_FLOOR));
        }
    }
}
