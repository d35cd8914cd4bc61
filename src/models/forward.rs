use crate::errors::{invalid, EngineResult};
use crate::models::params::Greeks;

// Forwards and futures are linear in spot: no optionality, no volatility input.
//
// forward price F = S * e^{rT}
// long forward value with delivery price K: V = S - K * e^{-rT}
//
// Futures are marked daily, so a futures position's P&L is simply
// (F_now - F_entry) * quantity with no discounting.

fn validate(spot: f64, time_to_expiry: f64, rate: f64) -> EngineResult<()> {
    if !spot.is_finite() || spot <= 0.0 {
        return Err(invalid(format!("spot must be positive, got {spot}")));
    }
    if !time_to_expiry.is_finite() || time_to_expiry < 0.0 {
        return Err(invalid(format!("time to expiry must be >= 0, got {time_to_expiry}")));
    }
    if !rate.is_finite() {
        return Err(invalid("rate must be finite"));
    }
    Ok(())
}

/// Fair delivery price for a forward (and fair futures price with deterministic rates).
pub fn forward_price(spot: f64, rate: f64, time_to_expiry: f64) -> EngineResult<f64> {
    validate(spot, time_to_expiry, rate)?;
    Ok(spot * (rate * time_to_expiry).exp())
}

/// Present value of one long forward struck at `delivery_price`.
pub fn forward_value(
    spot: f64,
    delivery_price: f64,
    rate: f64,
    time_to_expiry: f64,
) -> EngineResult<f64> {
    validate(spot, time_to_expiry, rate)?;
    if !delivery_price.is_finite() || delivery_price <= 0.0 {
        return Err(invalid(format!("delivery price must be positive, got {delivery_price}")));
    }
    Ok(spot - delivery_price * (-rate * time_to_expiry).exp())
}

/// Sensitivities of one long forward. Only delta and rho are non-zero.
pub fn forward_greeks(
    spot: f64,
    delivery_price: f64,
    rate: f64,
    time_to_expiry: f64,
) -> EngineResult<Greeks> {
    forward_value(spot, delivery_price, rate, time_to_expiry)?;
    let disc = (-rate * time_to_expiry).exp();
    Ok(Greeks {
        delta: 1.0,
        rho: delivery_price * time_to_expiry * disc,
        // Carry: the discounted delivery leg accretes toward K as time passes
        theta: -rate * delivery_price * disc / crate::models::DAYS_PER_YEAR,
        ..Greeks::default()
    })
}

/// Fair futures price. Identical to the forward price under deterministic rates.
#[inline]
pub fn futures_price(spot: f64, rate: f64, time_to_expiry: f64) -> EngineResult<f64> {
    forward_price(spot, rate, time_to_expiry)
}

/// Sensitivities of the futures price itself (per unit held).
pub fn futures_greeks(spot: f64, rate: f64, time_to_expiry: f64) -> EngineResult<Greeks> {
    let f = futures_price(spot, rate, time_to_expiry)?;
    Ok(Greeks {
        delta: (rate * time_to_expiry).exp(),
        rho: f * time_to_expiry,
        theta: -rate * f / crate::models::DAYS_PER_YEAR,
        ..Greeks::default()
    })
}

/// Cumulative variation margin on a futures position.
#[inline]
pub fn futures_pnl(entry_price: f64, current_price: f64, quantity: f64) -> f64 {
    (current_price - entry_price) * quantity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_at_fair_price_is_worth_zero() {
        let f = forward_price(2.5, 0.05, 0.5).unwrap();
        let v = forward_value(2.5, f, 0.05, 0.5).unwrap();
        assert!(v.abs() < 1e-12, "fair forward value={v}");
    }

    #[test]
    fn test_forward_value_at_expiry_is_spot_minus_delivery() {
        assert_eq!(forward_value(3.0, 2.5, 0.05, 0.0).unwrap(), 0.5);
    }

    #[test]
    fn test_forward_matches_put_call_parity_gap() {
        use crate::models::{price, OptionKind, OptionParameters};
        let call = OptionParameters::european(OptionKind::Call, 100.0, 100.0, 1.0, 0.2, 0.05);
        let c = price(&call).unwrap();
        let p = price(&call.with_kind(OptionKind::Put)).unwrap();
        let fwd = forward_value(100.0, 100.0, 0.05, 1.0).unwrap();
        assert!((c - p - fwd).abs() < 1e-8);
    }

    #[test]
    fn test_futures_pnl_follows_spot() {
        let entry = futures_price(2.5, 0.05, 0.25).unwrap();
        let later = futures_price(2.8, 0.05, 0.2).unwrap();
        assert!(futures_pnl(entry, later, 10.0) > 0.0);
        assert!(futures_pnl(entry, later, -10.0) < 0.0);
    }

    #[test]
    fn test_linear_greeks() {
        let g = forward_greeks(2.5, 2.6, 0.05, 1.0).unwrap();
        assert_eq!(g.delta, 1.0);
        assert_eq!(g.gamma, 0.0);
        assert_eq!(g.vega, 0.0);
        assert!(g.rho > 0.0);
        let fg = futures_greeks(2.5, 0.05, 1.0).unwrap();
        assert!(fg.delta > 1.0);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(forward_price(0.0, 0.05, 1.0).is_err());
        assert!(forward_price(2.5, 0.05, -1.0).is_err());
        assert!(forward_value(2.5, -1.0, 0.05, 1.0).is_err());
        assert!(futures_price(2.5, f64::NAN, 1.0).is_err());
    }
}
