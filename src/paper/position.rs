use crate::errors::{invalid, EngineResult};
use crate::models::forward;
use crate::models::{ExerciseStyle, Greeks, OptionKind, OptionParameters, PricingEngine, DAYS_PER_YEAR};

/// What a position holds. Expiries are absolute simulated days.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Instrument {
    Option {
        strike: f64,
        expiry_day: u64,
        kind: OptionKind,
        style: ExerciseStyle,
    },
    Forward {
        delivery_price: f64,
        expiry_day: u64,
    },
    Future {
        expiry_day: u64,
    },
}

impl Instrument {
    #[inline]
    pub fn expiry_day(&self) -> u64 {
        match *self {
            Self::Option { expiry_day, .. }
            | Self::Forward { expiry_day, .. }
            | Self::Future { expiry_day } => expiry_day,
        }
    }

    pub fn label(&self) -> String {
        match *self {
            Self::Option { strike, expiry_day, kind, style } => {
                format!("{style} {kind} K={strike:.2} d{expiry_day}")
            }
            Self::Forward { delivery_price, expiry_day } => {
                format!("forward K={delivery_price:.2} d{expiry_day}")
            }
            Self::Future { expiry_day } => format!("future d{expiry_day}"),
        }
    }
}

/// Immutable market inputs for one flavor at one instant.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct MarketQuote {
    pub spot: f64,
    pub day: u64,
    pub volatility: f64,
    pub rate: f64,
}

impl MarketQuote {
    #[inline]
    pub fn years_to(&self, expiry_day: u64) -> f64 {
        expiry_day.saturating_sub(self.day) as f64 / DAYS_PER_YEAR
    }
}

/// A caller-owned holding. Long when quantity > 0, short when < 0.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub id: uuid::Uuid,
    pub flavor: String,
    pub instrument: Instrument,
    pub quantity: f64,
    /// Per-unit value paid at open
    pub entry_price: f64,
    pub opened_day: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct OpenRequest {
    pub flavor: String,
    pub instrument: Instrument,
    pub quantity: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PositionMark {
    pub position_id: uuid::Uuid,
    pub flavor: String,
    pub unit_value: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    /// Quantity-scaled
    pub greeks: Greeks,
    pub expired: bool,
}

/// Per-unit value and Greeks of an instrument against a quote.
pub fn unit_valuation(
    instrument: &Instrument,
    quote: &MarketQuote,
    engine: &PricingEngine,
) -> EngineResult<(f64, Greeks)> {
    let t = quote.years_to(instrument.expiry_day());
    match *instrument {
        Instrument::Option { strike, kind, style, .. } => {
            let params = OptionParameters {
                spot: quote.spot,
                strike,
                time_to_expiry: t,
                volatility: quote.volatility,
                rate: quote.rate,
                kind,
                style,
            };
            Ok((engine.price(&params)?, engine.greeks(&params)?))
        }
        Instrument::Forward { delivery_price, .. } => Ok((
            forward::forward_value(quote.spot, delivery_price, quote.rate, t)?,
            forward::forward_greeks(quote.spot, delivery_price, quote.rate, t)?,
        )),
        Instrument::Future { .. } => Ok((
            forward::futures_price(quote.spot, quote.rate, t)?,
            forward::futures_greeks(quote.spot, quote.rate, t)?,
        )),
    }
}

/// Price the entry of a new position. The caller keeps the returned record.
pub fn open_position(
    request: &OpenRequest,
    quote: &MarketQuote,
    engine: &PricingEngine,
) -> EngineResult<Position> {
    if !request.quantity.is_finite() || request.quantity == 0.0 {
        return Err(invalid(format!("quantity must be finite and non-zero, got {}", request.quantity)));
    }
    if request.instrument.expiry_day() <= quote.day {
        return Err(invalid(format!(
            "expiry day {} is not after current day {}",
            request.instrument.expiry_day(),
            quote.day
        )));
    }

    let (entry_price, _) = unit_valuation(&request.instrument, quote, engine)?;

    Ok(Position {
        id: uuid::Uuid::new_v4(),
        flavor: request.flavor.clone(),
        instrument: request.instrument,
        quantity: request.quantity,
        entry_price,
        opened_day: quote.day,
    })
}

/// Current value, P&L and Greeks of a position. Never mutates it.
pub fn mark_position(
    position: &Position,
    quote: &MarketQuote,
    engine: &PricingEngine,
) -> EngineResult<PositionMark> {
    let (unit_value, greeks) = unit_valuation(&position.instrument, quote, engine)?;
    Ok(PositionMark {
        position_id: position.id,
        flavor: position.flavor.clone(),
        unit_value,
        market_value: unit_value * position.quantity,
        unrealized_pnl: (unit_value - position.entry_price) * position.quantity,
        greeks: greeks.scaled(position.quantity),
        expired: quote.day >= position.instrument.expiry_day(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(spot: f64, day: u64) -> MarketQuote {
        MarketQuote { spot, day, volatility: 0.35, rate: 0.05 }
    }

    fn call(strike: f64, expiry_day: u64) -> Instrument {
        Instrument::Option {
            strike,
            expiry_day,
            kind: OptionKind::Call,
            style: ExerciseStyle::European,
        }
    }

    #[test]
    fn test_open_prices_entry_at_kernel_value() {
        let engine = PricingEngine::default();
        let req = OpenRequest { flavor: "vanilla".into(), instrument: call(2.5, 30), quantity: 10.0 };
        let pos = open_position(&req, &quote(2.5, 0), &engine).unwrap();
        let params = OptionParameters::european(OptionKind::Call, 2.5, 2.5, 30.0 / 365.0, 0.35, 0.05);
        assert!((pos.entry_price - engine.price(&params).unwrap()).abs() < 1e-15);
        let mark = mark_position(&pos, &quote(2.5, 0), &engine).unwrap();
        assert!(mark.unrealized_pnl.abs() < 1e-12);
        assert!(!mark.expired);
    }

    #[test]
    fn test_mark_tracks_spot_and_scales_greeks() {
        let engine = PricingEngine::default();
        let req = OpenRequest { flavor: "vanilla".into(), instrument: call(2.5, 30), quantity: -4.0 };
        let pos = open_position(&req, &quote(2.5, 0), &engine).unwrap();
        let up = mark_position(&pos, &quote(3.0, 1), &engine).unwrap();
        assert!(up.unrealized_pnl < 0.0, "short call loses when spot rises");
        assert!(up.greeks.delta < 0.0 && up.greeks.delta >= -4.0);
    }

    #[test]
    fn test_expired_option_settles_at_intrinsic() {
        let engine = PricingEngine::default();
        let req = OpenRequest { flavor: "mint".into(), instrument: call(2.0, 5), quantity: 2.0 };
        let pos = open_position(&req, &quote(2.0, 0), &engine).unwrap();
        let mark = mark_position(&pos, &quote(2.6, 9), &engine).unwrap();
        assert!(mark.expired);
        assert!((mark.unit_value - 0.6).abs() < 1e-12);
        assert!((mark.market_value - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_forward_and_future_marks() {
        let engine = PricingEngine::default();
        let q = quote(2.5, 0);
        let fair = forward::forward_price(2.5, 0.05, 60.0 / 365.0).unwrap();
        let fwd = OpenRequest {
            flavor: "chocolate".into(),
            instrument: Instrument::Forward { delivery_price: fair, expiry_day: 60 },
            quantity: 1.0,
        };
        let pos = open_position(&fwd, &q, &engine).unwrap();
        assert!(pos.entry_price.abs() < 1e-12);

        let fut = OpenRequest {
            flavor: "chocolate".into(),
            instrument: Instrument::Future { expiry_day: 60 },
            quantity: 3.0,
        };
        let pos = open_position(&fut, &q, &engine).unwrap();
        let mark = mark_position(&pos, &quote(2.0, 10), &engine).unwrap();
        assert!(mark.unrealized_pnl < 0.0);
        assert!(mark.greeks.delta > 3.0);
    }

    #[test]
    fn test_open_rejects_bad_requests() {
        let engine = PricingEngine::default();
        let zero = OpenRequest { flavor: "v".into(), instrument: call(2.5, 30), quantity: 0.0 };
        assert!(open_position(&zero, &quote(2.5, 0), &engine).is_err());
        let stale = OpenRequest { flavor: "v".into(), instrument: call(2.5, 3), quantity: 1.0 };
        assert!(open_position(&stale, &quote(2.5, 3), &engine).is_err());
        let bad_strike = OpenRequest { flavor: "v".into(), instrument: call(-1.0, 30), quantity: 1.0 };
        assert!(open_position(&bad_strike, &quote(2.5, 0), &engine).is_err());
    }

    #[test]
    fn test_instrument_json_shape() {
        let json = r#"{"type":"option","strike":2.5,"expiry_day":30,"kind":"put","style":"american"}"#;
        let inst: Instrument = serde_json::from_str(json).unwrap();
        assert_eq!(inst.expiry_day(), 30);
        assert!(inst.label().contains("american put"));
    }
}
