use crate::errors::{invalid, EngineError, EngineResult};
use crate::models::params::{
    intrinsic, ExerciseStyle, Greeks, OptionParameters, DAYS_PER_YEAR,
};
use crate::models::PricingModel;

/// Default lattice depth. Cost is fixed at O(steps^2) per valuation.
pub const DEFAULT_STEPS: usize = 100;

/// Deepest lattice accepted; one valuation already costs about 5e7 node updates.
pub const MAX_STEPS: usize = 10_000;

/// Absolute volatility bump for lattice vega.
const VEGA_BUMP: f64 = 0.01;

/// Absolute rate bump for lattice rho.
const RHO_BUMP: f64 = 1e-4;

/// Cox-Ross-Rubinstein binomial lattice.
///
/// u = e^{sigma * sqrt(dt)}, d = 1/u, p = (e^{r*dt} - d) / (u - d)
///
/// When the rate outruns the volatility (e^{r*dt} >= u) that p leaves [0, 1], so the
/// lattice switches to a drift-centred tree instead:
/// u = e^{(r - sigma^2/2)dt + sigma*sqrt(dt)}, d = e^{(r - sigma^2/2)dt - sigma*sqrt(dt)}, p = 1/2.
///
/// Backward induction over a single per-step array of node values (no recursion).
/// American style takes max(exercise, continuation) at every node; European style
/// discounts continuation only, which makes the lattice a cross-check on the closed form.
#[derive(Debug, Clone, Copy)]
pub struct CoxRossRubinstein {
    steps: usize,
}

impl Default for CoxRossRubinstein {
    fn default() -> Self {
        Self { steps: DEFAULT_STEPS }
    }
}

/// Root value plus the first two lattice layers, enough for delta/gamma/theta.
#[derive(Debug, Clone, Copy)]
struct Rollback {
    value: f64,
    layer1: [f64; 2],
    layer2: [f64; 3],
    up: f64,
    down: f64,
    dt: f64,
}

/// One-step move sizes and up-probability.
#[derive(Debug, Clone, Copy, PartialEq)]
struct StepMoves {
    up: f64,
    down: f64,
    prob: f64,
}

impl StepMoves {
    fn for_step(volatility: f64, rate: f64, dt: f64) -> EngineResult<Self> {
        let spread = volatility * dt.sqrt();
        let up = spread.exp();
        let down = 1.0 / up;
        let prob = ((rate * dt).exp() - down) / (up - down);
        if prob.is_finite() && (0.0..=1.0).contains(&prob) {
            return Ok(Self { up, down, prob });
        }

        let drift = (rate - 0.5 * volatility * volatility) * dt;
        let moves = Self { up: (drift + spread).exp(), down: (drift - spread).exp(), prob: 0.5 };
        if !(moves.up.is_finite() && moves.down > 0.0 && moves.up > moves.down) {
            return Err(EngineError::NumericOverflow(format!(
                "degenerate lattice moves (vol={volatility}, rate={rate}, dt={dt})"
            )));
        }
        Ok(moves)
    }
}

impl CoxRossRubinstein {
    /// Greeks read nodes two layers deep, so at least two steps are required.
    pub fn new(steps: usize) -> EngineResult<Self> {
        if steps < 2 {
            return Err(invalid(format!("lattice needs at least 2 steps, got {steps}")));
        }
        if steps > MAX_STEPS {
            return Err(invalid(format!("lattice depth capped at {MAX_STEPS} steps, got {steps}")));
        }
        Ok(Self { steps })
    }

    #[inline]
    pub fn steps(&self) -> usize {
        self.steps
    }

    fn roll_back(&self, p: &OptionParameters) -> EngineResult<Rollback> {
        let n = self.steps;
        let dt = p.time_to_expiry / n as f64;
        let StepMoves { up, down, prob } = StepMoves::for_step(p.volatility, p.rate, dt)?;
        let disc = (-p.rate * dt).exp();
        let early_exercise = p.style == ExerciseStyle::American;
        let ratio = up / down;

        // Terminal layer: node j has j up-moves, price S * d^{n-j} * u^j
        let mut values = Vec::with_capacity(n + 1);
        let mut s = p.spot * down.powi(n as i32);
        for _ in 0..=n {
            values.push(intrinsic(p.kind, s, p.strike));
            s *= ratio;
        }

        let mut layer1 = [0.0; 2];
        let mut layer2 = [0.0; 3];
        if n == 2 {
            layer2.copy_from_slice(&values[..3]);
        }

        for i in (0..n).rev() {
            let mut s = p.spot * down.powi(i as i32);
            for j in 0..=i {
                let continuation = disc * (prob * values[j + 1] + (1.0 - prob) * values[j]);
                values[j] = if early_exercise {
                    continuation.max(intrinsic(p.kind, s, p.strike))
                } else {
                    continuation
                };
                s *= ratio;
            }
            match i {
                2 => layer2.copy_from_slice(&values[..3]),
                1 => layer1.copy_from_slice(&values[..2]),
                _ => {}
            }
        }

        let value = values[0];
        if !value.is_finite() {
            return Err(EngineError::NumericOverflow(format!(
                "lattice value not finite for {p:?}"
            )));
        }

        Ok(Rollback { value, layer1, layer2, up, down, dt })
    }

    fn value_only(&self, p: &OptionParameters) -> EngineResult<f64> {
        Ok(self.roll_back(p)?.value.max(0.0))
    }
}

impl PricingModel for CoxRossRubinstein {
    #[inline]
    fn name(&self) -> &'static str {
        "CRR-Lattice"
    }

    fn price(&self, params: &OptionParameters) -> EngineResult<f64> {
        params.validate()?;
        if params.is_expired() {
            return Ok(params.intrinsic());
        }
        self.value_only(params)
    }

    /// delta, gamma and theta from the lattice's first two layers;
    /// vega and rho by central bump-and-reprice on the same lattice depth.
    fn greeks(&self, params: &OptionParameters) -> EngineResult<Greeks> {
        params.validate()?;
        if params.is_expired() {
            return Ok(Greeks::at_expiry(params.kind, params.spot, params.strike));
        }

        let rb = self.roll_back(params)?;
        let s = params.spot;
        let (u, d) = (rb.up, rb.down);

        let delta = (rb.layer1[1] - rb.layer1[0]) / (s * u - s * d);

        let s_uu = s * u * u;
        let s_ud = s * u * d;
        let s_dd = s * d * d;
        let delta_up = (rb.layer2[2] - rb.layer2[1]) / (s_uu - s_ud);
        let delta_down = (rb.layer2[1] - rb.layer2[0]) / (s_ud - s_dd);
        let gamma = (delta_up - delta_down) / (0.5 * (s_uu - s_dd));

        // Middle node of layer 2 sits at S*u*d two steps later (the spot itself when u*d = 1)
        let theta = (rb.layer2[1] - rb.value) / (2.0 * rb.dt) / DAYS_PER_YEAR;

        let h = VEGA_BUMP.min(0.5 * params.volatility);
        let vega = (self.value_only(&params.with_volatility(params.volatility + h))?
            - self.value_only(&params.with_volatility(params.volatility - h))?)
            / (2.0 * h);

        let rho = (self.value_only(&params.with_rate(params.rate + RHO_BUMP))?
            - self.value_only(&params.with_rate(params.rate - RHO_BUMP))?)
            / (2.0 * RHO_BUMP);

        let greeks = Greeks { delta, gamma, theta, vega, rho };
        if !greeks.is_finite() {
            return Err(EngineError::NumericOverflow(format!(
                "lattice greeks not finite for {params:?}"
            )));
        }
        Ok(greeks)
    }
}
