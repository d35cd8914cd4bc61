use crate::errors::{invalid, EngineError, EngineResult};
use crate::models::black_scholes::BlackScholes;
use crate::models::params::{Auxiliaries, OptionKind, OptionParameters};

const VOL_LOWER: f64 = 1e-4;
const VOL_UPPER: f64 = 5.0;
const TOLERANCE: f64 = 1e-10;
const MAX_ITERATIONS: usize = 100;

/// Invert Black-Scholes for volatility given an observed European price.
///
/// Safeguarded Newton: take the vega step when it stays inside the current
/// bracket, otherwise bisect. The bracket [1e-4, 5.0] always shrinks, so the
/// loop terminates even where vega vanishes deep in the wings.
///
/// `params.volatility` is ignored; T must be > 0.
pub fn implied_volatility(params: &OptionParameters, target_price: f64) -> EngineResult<f64> {
    params.with_volatility(VOL_LOWER).validate()?;
    if params.is_expired() {
        return Err(invalid("implied volatility undefined at expiry"));
    }
    if !target_price.is_finite() {
        return Err(invalid("target price must be finite"));
    }

    let disc_k = params.strike * (-params.rate * params.time_to_expiry).exp();
    let (lower_bound, upper_bound) = match params.kind {
        OptionKind::Call => ((params.spot - disc_k).max(0.0), params.spot),
        OptionKind::Put => ((disc_k - params.spot).max(0.0), disc_k),
    };
    if target_price <= lower_bound || target_price >= upper_bound {
        return Err(invalid(format!(
            "price {target_price} outside no-arbitrage bounds ({lower_bound}, {upper_bound})"
        )));
    }

    let value_at = |sigma: f64| {
        let p = params.with_volatility(sigma);
        let aux = Auxiliaries::new(&p);
        (BlackScholes::price_with(&p, &aux), BlackScholes::greeks_with(&p, &aux).vega)
    };

    let (mut lo, mut hi) = (VOL_LOWER, VOL_UPPER);
    if value_at(hi).0 < target_price {
        return Err(EngineError::NumericOverflow(format!(
            "price {target_price} needs volatility above {VOL_UPPER}"
        )));
    }
    if value_at(lo).0 > target_price {
        return Err(EngineError::NumericOverflow(format!(
            "price {target_price} needs volatility below {VOL_LOWER}"
        )));
    }

    // Brenner-Subrahmanyam seed, pulled into the bracket
    let mut sigma = ((2.0 * std::f64::consts::PI / params.time_to_expiry).sqrt()
        * target_price
        / params.spot)
        .clamp(lo, hi);

    for _ in 0..MAX_ITERATIONS {
        let (value, vega) = value_at(sigma);
        let diff = value - target_price;
        if diff.abs() < TOLERANCE {
            return Ok(sigma);
        }
        if diff > 0.0 {
            hi = sigma;
        } else {
            lo = sigma;
        }

        let newton = sigma - diff / vega;
        sigma = if vega > 1e-12 && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };

        if hi - lo < TOLERANCE {
            return Ok(sigma);
        }
    }

    Err(EngineError::NumericOverflow(format!(
        "implied volatility did not converge for price {target_price}"
    )))
}
