use crate::errors::{EngineError, EngineResult};
use crate::models::normal::cdf;
use crate::models::params::{Auxiliaries, Greeks, OptionKind, OptionParameters, DAYS_PER_YEAR};
use crate::models::PricingModel;

/// Black-Scholes closed form for European exercise.
///
/// call = S * Phi(d1) - K * e^{-rT} * Phi(d2)
/// put  = K * e^{-rT} * Phi(-d2) - S * Phi(-d1)
///
/// where d1 = (ln(S/K) + (r + sigma^2/2) * T) / (sigma * sqrt(T))
/// and   d2 = d1 - sigma * sqrt(T).
///
/// Price and Greeks read the same precomputed Auxiliaries. No allocations.
/// The exercise style field is ignored: this model always values European exercise.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlackScholes;

impl BlackScholes {
    /// Price from already-computed auxiliaries. Caller guarantees valid params with T > 0.
    #[inline]
    pub fn price_with(params: &OptionParameters, aux: &Auxiliaries) -> f64 {
        let s = params.spot;
        let k_disc = params.strike * aux.discount;
        let value = match params.kind {
            OptionKind::Call => s * cdf(aux.d1) - k_disc * cdf(aux.d2),
            OptionKind::Put => k_disc * cdf(-aux.d2) - s * cdf(-aux.d1),
        };
        // Rounding can leave deep out-of-the-money values a hair below zero
        value.max(0.0)
    }

    #[inline]
    pub fn greeks_with(params: &OptionParameters, aux: &Auxiliaries) -> Greeks {
        let s = params.spot;
        let k_disc = params.strike * aux.discount;
        let t = params.time_to_expiry;
        let pdf_d1 = aux.pdf_d1();

        let gamma = pdf_d1 / (s * aux.sigma_sqrt_t);
        let vega = s * pdf_d1 * aux.sqrt_t;
        let decay = -s * pdf_d1 * params.volatility / (2.0 * aux.sqrt_t);

        let (delta, theta_year, rho) = match params.kind {
            OptionKind::Call => {
                let n_d2 = cdf(aux.d2);
                (
                    cdf(aux.d1),
                    decay - params.rate * k_disc * n_d2,
                    k_disc * t * n_d2,
                )
            }
            OptionKind::Put => {
                let n_neg_d2 = cdf(-aux.d2);
                (
                    cdf(aux.d1) - 1.0,
                    decay + params.rate * k_disc * n_neg_d2,
                    -k_disc * t * n_neg_d2,
                )
            }
        };

        Greeks {
            delta,
            gamma,
            theta: theta_year / DAYS_PER_YEAR,
            vega,
            rho,
        }
    }
}

impl PricingModel for BlackScholes {
    #[inline]
    fn name(&self) -> &'static str {
        "Black-Scholes"
    }

    fn price(&self, params: &OptionParameters) -> EngineResult<f64> {
        params.validate()?;
        if params.is_expired() {
            return Ok(params.intrinsic());
        }

        let aux = Auxiliaries::new(params);
        let value = Self::price_with(params, &aux);
        if !value.is_finite() {
            return Err(EngineError::NumericOverflow(format!(
                "black-scholes value not finite for {params:?}"
            )));
        }
        Ok(value)
    }

    fn greeks(&self, params: &OptionParameters) -> EngineResult<Greeks> {
        params.validate()?;
        if params.is_expired() {
            return Ok(Greeks::at_expiry(params.kind, params.spot, params.strike));
        }

        let aux = Auxiliaries::new(params);
        let greeks = Self::greeks_with(params, &aux);
        if !greeks.is_finite() {
            return Err(EngineError::NumericOverflow(format!(
                "black-scholes greeks not finite for {params:?}"
            )));
        }
        Ok(greeks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn atm(kind: OptionKind) -> OptionParameters {
        OptionParameters::european(kind, 100.0, 100.0, 1.0, 0.2, 0.05)
    }

    #[test]
    fn test_textbook_call() {
        let p = BlackScholes.price(&atm(OptionKind::Call)).unwrap();
        assert!((p - 10.45).abs() < 0.01, "ATM call={p} should be ~10.45");
    }

    #[test]
    fn test_textbook_put_and_parity() {
        let c = BlackScholes.price(&atm(OptionKind::Call)).unwrap();
        let p = BlackScholes.price(&atm(OptionKind::Put)).unwrap();
        assert!((p - 5.57).abs() < 0.01, "ATM put={p} should be ~5.57");
        let forward_gap = 100.0 - 100.0 * (-0.05_f64).exp();
        assert!((c - p - forward_gap).abs() < 1e-8);
        assert!((forward_gap - 4.88).abs() < 0.01);
    }

    #[test]
    fn test_textbook_deltas() {
        let call = BlackScholes.greeks(&atm(OptionKind::Call)).unwrap();
        let put = BlackScholes.greeks(&atm(OptionKind::Put)).unwrap();
        assert!((call.delta - 0.64).abs() < 0.01, "call delta={}", call.delta);
        assert!((put.delta + 0.36).abs() < 0.01, "put delta={}", put.delta);
        assert!((call.delta - put.delta - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_expiry_is_intrinsic() {
        let call = OptionParameters::european(OptionKind::Call, 90.0, 100.0, 0.0, 0.2, 0.05);
        let put = call.with_kind(OptionKind::Put);
        assert_eq!(BlackScholes.price(&call).unwrap(), 0.0);
        assert_eq!(BlackScholes.price(&put).unwrap(), 10.0);
    }

    #[test]
    fn test_converges_to_intrinsic() {
        let mut p = OptionParameters::european(OptionKind::Call, 105.0, 100.0, 1e-9, 0.3, 0.05);
        let v = BlackScholes.price(&p).unwrap();
        assert!((v - 5.0).abs() < 1e-6, "near-expiry ITM call={v}");
        p.spot = 95.0;
        assert!(BlackScholes.price(&p).unwrap() < 1e-9);
    }

    #[test]
    fn test_rejects_zero_vol_and_negative_t() {
        let p = atm(OptionKind::Call).with_volatility(0.0);
        assert!(BlackScholes.price(&p).is_err());
        assert!(BlackScholes.greeks(&p).is_err());
        let p = OptionParameters { time_to_expiry: -1.0, ..atm(OptionKind::Put) };
        assert!(BlackScholes.price(&p).is_err());
    }

    #[test]
    fn test_extreme_volatility_is_bounded() {
        let p = atm(OptionKind::Call).with_volatility(5.0);
        let v = BlackScholes.price(&p).unwrap();
        assert!(v.is_finite() && v >= 0.0 && v <= p.spot, "500% vol call={v}");
        let g = BlackScholes.greeks(&p).unwrap();
        assert!(g.is_finite());
    }

    #[test]
    fn test_theta_is_daily_and_negative_for_atm_call() {
        let g = BlackScholes.greeks(&atm(OptionKind::Call)).unwrap();
        // Annual theta for this benchmark is about -6.41
        assert!((g.theta * 365.0 + 6.414).abs() < 0.01, "theta/day={}", g.theta);
    }

    #[test]
    fn test_rho_signs() {
        let call = BlackScholes.greeks(&atm(OptionKind::Call)).unwrap();
        let put = BlackScholes.greeks(&atm(OptionKind::Put)).unwrap();
        assert!(call.rho > 0.0 && put.rho < 0.0);
        // rho_call - rho_put = K * T * e^{-rT}
        let expected = 100.0 * (-0.05_f64).exp();
        assert!((call.rho - put.rho - expected).abs() < 1e-9);
    }

    fn valid_params() -> impl Strategy<Value = OptionParameters> {
        (1.0..500.0f64, 1.0..500.0f64, 0.01..5.0f64, 0.01..3.0f64, -0.05..0.2f64).prop_map(
            |(s, k, t, v, r)| OptionParameters::european(OptionKind::Call, s, k, t, v, r),
        )
    }

    proptest! {
        #[test]
        fn prop_put_call_parity(p in valid_params()) {
            let c = BlackScholes.price(&p).unwrap();
            let q = BlackScholes.price(&p.with_kind(OptionKind::Put)).unwrap();
            let rhs = p.spot - p.strike * (-p.rate * p.time_to_expiry).exp();
            let tol = 1e-8 * p.spot.max(p.strike);
            prop_assert!((c - q - rhs).abs() < tol, "c={} q={} rhs={}", c, q, rhs);
        }

        #[test]
        fn prop_delta_bounds(p in valid_params()) {
            let c = BlackScholes.greeks(&p).unwrap();
            let q = BlackScholes.greeks(&p.with_kind(OptionKind::Put)).unwrap();
            prop_assert!((0.0..=1.0).contains(&c.delta));
            prop_assert!((-1.0..=0.0).contains(&q.delta));
        }

        #[test]
        fn prop_gamma_vega_shared(p in valid_params()) {
            let c = BlackScholes.greeks(&p).unwrap();
            let q = BlackScholes.greeks(&p.with_kind(OptionKind::Put)).unwrap();
            prop_assert_eq!(c.gamma, q.gamma);
            prop_assert_eq!(c.vega, q.vega);
            prop_assert!(c.vega >= 0.0);
        }

        #[test]
        fn prop_monotone_in_volatility(p in valid_params(), bump in 0.001..1.0f64) {
            for kind in [OptionKind::Call, OptionKind::Put] {
                let lo = BlackScholes.price(&p.with_kind(kind)).unwrap();
                let hi = BlackScholes
                    .price(&p.with_kind(kind).with_volatility(p.volatility + bump))
                    .unwrap();
                prop_assert!(hi >= lo - 1e-9, "{kind}: {} < {}", hi, lo);
            }
        }

        #[test]
        fn prop_call_bounded_by_spot(p in valid_params()) {
            let c = BlackScholes.price(&p).unwrap();
            prop_assert!(c >= 0.0 && c <= p.spot + 1e-9);
        }
    }
}
