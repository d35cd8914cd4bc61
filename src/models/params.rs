use crate::errors::{invalid, EngineResult};
use crate::models::normal;

/// Volatilities below this are rejected rather than divided by.
pub const MIN_VOLATILITY: f64 = 1e-8;

/// Calendar days per year. Theta is reported per day on this basis.
pub const DAYS_PER_YEAR: f64 = 365.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Call,
    Put,
}

impl std::fmt::Display for OptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Put => write!(f, "put"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseStyle {
    European,
    American,
}

impl std::fmt::Display for ExerciseStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::European => write!(f, "european"),
            Self::American => write!(f, "american"),
        }
    }
}

/// Immutable valuation inputs. Time is in years, volatility and rate annualized.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OptionParameters {
    pub spot: f64,
    pub strike: f64,
    pub time_to_expiry: f64,
    pub volatility: f64,
    pub rate: f64,
    pub kind: OptionKind,
    pub style: ExerciseStyle,
}

impl OptionParameters {
    pub fn european(
        kind: OptionKind,
        spot: f64,
        strike: f64,
        time_to_expiry: f64,
        volatility: f64,
        rate: f64,
    ) -> Self {
        Self {
            spot,
            strike,
            time_to_expiry,
            volatility,
            rate,
            kind,
            style: ExerciseStyle::European,
        }
    }

    pub fn american(
        kind: OptionKind,
        spot: f64,
        strike: f64,
        time_to_expiry: f64,
        volatility: f64,
        rate: f64,
    ) -> Self {
        Self {
            style: ExerciseStyle::American,
            ..Self::european(kind, spot, strike, time_to_expiry, volatility, rate)
        }
    }

    #[inline]
    pub fn with_kind(self, kind: OptionKind) -> Self {
        Self { kind, ..self }
    }

    #[inline]
    pub fn with_volatility(self, volatility: f64) -> Self {
        Self { volatility, ..self }
    }

    #[inline]
    pub fn with_rate(self, rate: f64) -> Self {
        Self { rate, ..self }
    }

    /// Caller contract. Every engine entry point runs this first.
    pub fn validate(&self) -> EngineResult<()> {
        if !self.spot.is_finite() || self.spot <= 0.0 {
            return Err(invalid(format!("spot must be positive, got {}", self.spot)));
        }
        if !self.strike.is_finite() || self.strike <= 0.0 {
            return Err(invalid(format!("strike must be positive, got {}", self.strike)));
        }
        if !self.time_to_expiry.is_finite() || self.time_to_expiry < 0.0 {
            return Err(invalid(format!(
                "time to expiry must be >= 0, got {}",
                self.time_to_expiry
            )));
        }
        if !self.volatility.is_finite() || self.volatility < MIN_VOLATILITY {
            return Err(invalid(format!(
                "volatility must be >= {MIN_VOLATILITY}, got {}",
                self.volatility
            )));
        }
        if !self.rate.is_finite() {
            return Err(invalid("rate must be finite"));
        }
        Ok(())
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.time_to_expiry <= 0.0
    }

    /// Exercise value right now.
    #[inline]
    pub fn intrinsic(&self) -> f64 {
        intrinsic(self.kind, self.spot, self.strike)
    }
}

#[inline]
pub fn intrinsic(kind: OptionKind, spot: f64, strike: f64) -> f64 {
    match kind {
        OptionKind::Call => (spot - strike).max(0.0),
        OptionKind::Put => (strike - spot).max(0.0),
    }
}

/// Sensitivities. theta is per calendar day; vega and rho per unit of vol/rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

impl Greeks {
    /// Greeks of an instrument at expiry: only delta survives, as a step in moneyness.
    pub fn at_expiry(kind: OptionKind, spot: f64, strike: f64) -> Self {
        let delta = match kind {
            OptionKind::Call if spot > strike => 1.0,
            OptionKind::Call if spot < strike => 0.0,
            OptionKind::Call => 0.5,
            OptionKind::Put if spot < strike => -1.0,
            OptionKind::Put if spot > strike => 0.0,
            OptionKind::Put => -0.5,
        };
        Self { delta, ..Self::default() }
    }

    #[inline]
    pub fn scaled(&self, quantity: f64) -> Self {
        Self {
            delta: self.delta * quantity,
            gamma: self.gamma * quantity,
            theta: self.theta * quantity,
            vega: self.vega * quantity,
            rho: self.rho * quantity,
        }
    }

    #[inline]
    pub fn accumulate(&mut self, other: &Greeks) {
        self.delta += other.delta;
        self.gamma += other.gamma;
        self.theta += other.theta;
        self.vega += other.vega;
        self.rho += other.rho;
    }

    pub fn is_finite(&self) -> bool {
        self.delta.is_finite()
            && self.gamma.is_finite()
            && self.theta.is_finite()
            && self.vega.is_finite()
            && self.rho.is_finite()
    }
}

// ── Precomputed closed-form auxiliaries (stack, no alloc) ──

/// d1/d2 and friends, computed once per valuation and shared by price and Greeks.
/// Only meaningful for validated parameters with T > 0.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Auxiliaries {
    pub sqrt_t: f64,
    pub sigma_sqrt_t: f64,
    pub discount: f64,
    pub d1: f64,
    pub d2: f64,
}

impl Auxiliaries {
    #[inline]
    pub fn new(p: &OptionParameters) -> Self {
        let t = p.time_to_expiry;
        let ln_s_k = (p.spot / p.strike).ln();
        let sqrt_t = t.sqrt();
        let sigma_sqrt_t = p.volatility * sqrt_t;
        let half_sigma_sq = 0.5 * p.volatility * p.volatility;
        let d1 = (ln_s_k + (p.rate + half_sigma_sq) * t) / sigma_sqrt_t;
        let d2 = d1 - sigma_sqrt_t;
        Self {
            sqrt_t,
            sigma_sqrt_t,
            discount: (-p.rate * t).exp(),
            d1,
            d2,
        }
    }

    #[inline]
    pub fn pdf_d1(&self) -> f64 {
        normal::pdf(self.d1)
    }
}
