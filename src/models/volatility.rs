use std::collections::VecDeque;

/// EWMA decay factor (lambda = 0.94, RiskMetrics daily)
const EWMA_LAMBDA: f64 = 0.94;

/// Threshold multiplier for jump detection (returns > JUMP_THRESHOLD * sigma)
const JUMP_THRESHOLD: f64 = 3.0;

/// Rolling windows, in observations (one per simulated day)
const SHORT_VOL_WINDOW: usize = 10;
const LONG_VOL_WINDOW: usize = 120;

/// Regime threshold: short_var / long_var > this = turbulent
const REGIME_THRESHOLD: f64 = 1.5;

/// Minimum samples before estimates are considered reliable
const MIN_SAMPLES: u64 = 20;

/// Observations per year when one observation is one day.
const OBS_PER_YEAR_AT_ONE_DAY: f64 = 365.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolRegime {
    Calm,
    Turbulent,
}

impl std::fmt::Display for VolRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Calm => write!(f, "calm"),
            Self::Turbulent => write!(f, "turbulent"),
        }
    }
}

// ── Realized volatility state (stack-allocated, Copy) ──

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[repr(C)]
pub struct RealizedVolState {
    /// Per-observation EWMA volatility of log returns
    pub ewma_vol: f64,
    /// Share of windowed returns beyond JUMP_THRESHOLD sigmas
    pub jump_frequency: f64,
    pub regime: VolRegime,
    pub sample_count: u64,
}

impl Default for RealizedVolState {
    fn default() -> Self {
        Self {
            ewma_vol: 0.0,
            jump_frequency: 0.0,
            regime: VolRegime::Calm,
            sample_count: 0,
        }
    }
}

/// Realized volatility of one flavor's simulated path.
/// Feeds quote volatility once enough days have been observed.
pub struct RealizedVol {
    /// Recent log returns (ring buffer, pre-allocated)
    returns: VecDeque<f64>,
    prev_price: f64,
    pub state: RealizedVolState,
}

impl Default for RealizedVol {
    fn default() -> Self {
        Self::new()
    }
}

impl RealizedVol {
    pub fn new() -> Self {
        Self {
            returns: VecDeque::with_capacity(LONG_VOL_WINDOW + 1),
            prev_price: 0.0,
            state: RealizedVolState::default(),
        }
    }

    /// Observe a new price. Pure state transition: old_state + new_price -> new_state.
    #[inline]
    pub fn update(&mut self, price: f64) {
        if price <= 0.0 || !price.is_finite() {
            return;
        }

        if self.prev_price <= 0.0 {
            self.prev_price = price;
            return;
        }

        let log_return = (price / self.prev_price).ln();
        self.prev_price = price;

        if !log_return.is_finite() {
            return;
        }

        if self.returns.len() >= LONG_VOL_WINDOW {
            self.returns.pop_front();
        }
        self.returns.push_back(log_return);
        self.state.sample_count += 1;

        let r_sq = log_return * log_return;
        self.state.ewma_vol = if self.state.sample_count == 1 {
            log_return.abs()
        } else {
            (EWMA_LAMBDA * self.state.ewma_vol * self.state.ewma_vol + (1.0 - EWMA_LAMBDA) * r_sq)
                .sqrt()
        };

        if self.state.sample_count < MIN_SAMPLES {
            return;
        }

        self.update_jump_stats();
        self.update_regime();
    }

    fn update_jump_stats(&mut self) {
        let threshold = JUMP_THRESHOLD * self.state.ewma_vol;
        let jumps = self.returns.iter().filter(|r| r.abs() > threshold).count();
        self.state.jump_frequency = jumps as f64 / self.returns.len() as f64;
    }

    fn update_regime(&mut self) {
        let short_var = variance_of_last(&self.returns, SHORT_VOL_WINDOW);
        let long_var = variance_of_last(&self.returns, LONG_VOL_WINDOW);

        if long_var > 1e-16 {
            self.state.regime = if short_var / long_var > REGIME_THRESHOLD {
                VolRegime::Turbulent
            } else {
                VolRegime::Calm
            };
        }
    }

    /// EWMA volatility scaled to annual terms for observations `dt_days` apart.
    #[inline]
    pub fn annualized_vol(&self, dt_days: f64) -> f64 {
        let obs_per_year = OBS_PER_YEAR_AT_ONE_DAY / dt_days.max(f64::MIN_POSITIVE);
        self.state.ewma_vol * obs_per_year.sqrt()
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state.sample_count >= MIN_SAMPLES
    }
}

/// Compute variance of the last `window` elements in a VecDeque. No allocation.
#[inline]
fn variance_of_last(data: &VecDeque<f64>, window: usize) -> f64 {
    let n = data.len().min(window);
    if n < 2 {
        return 0.0;
    }

    let nf = n as f64;
    let tail = data.iter().skip(data.len() - n);
    let mean = tail.clone().sum::<f64>() / nf;
    tail.map(|r| (r - mean) * (r - mean)).sum::<f64>() / (nf - 1.0)
}
