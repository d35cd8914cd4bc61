pub mod binomial;
pub mod black_scholes;
pub mod forward;
pub mod implied_vol;
pub mod normal;
pub mod params;
pub mod volatility;

use crate::errors::EngineResult;
use crate::models::binomial::CoxRossRubinstein;
use crate::models::black_scholes::BlackScholes;
pub use crate::models::params::{
    ExerciseStyle, Greeks, OptionKind, OptionParameters, DAYS_PER_YEAR, MIN_VOLATILITY,
};

/// All option pricing models implement this trait.
/// price() and greeks() must be pure functions: deterministic output from inputs only.
/// Send + Sync required so one engine can be shared by the engine task and REST handlers.
pub trait PricingModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Present value. Validates inputs, returns intrinsic value at T = 0.
    fn price(&self, params: &OptionParameters) -> EngineResult<f64>;

    fn greeks(&self, params: &OptionParameters) -> EngineResult<Greeks>;
}

/// Routes each valuation to the model that handles its exercise style:
/// closed form for European, lattice for American.
#[derive(Debug, Clone)]
pub struct PricingEngine {
    european: BlackScholes,
    american: CoxRossRubinstein,
}

impl Default for PricingEngine {
    fn default() -> Self {
        Self {
            european: BlackScholes,
            american: CoxRossRubinstein::default(),
        }
    }
}

impl PricingEngine {
    pub fn new(lattice_steps: usize) -> EngineResult<Self> {
        Ok(Self {
            european: BlackScholes,
            american: CoxRossRubinstein::new(lattice_steps)?,
        })
    }

    #[inline]
    pub fn model_for(&self, style: ExerciseStyle) -> &dyn PricingModel {
        match style {
            ExerciseStyle::European => &self.european,
            ExerciseStyle::American => &self.american,
        }
    }

    #[inline]
    pub fn price(&self, params: &OptionParameters) -> EngineResult<f64> {
        self.model_for(params.style).price(params)
    }

    #[inline]
    pub fn greeks(&self, params: &OptionParameters) -> EngineResult<Greeks> {
        self.model_for(params.style).greeks(params)
    }

    #[inline]
    pub fn lattice_steps(&self) -> usize {
        self.american.steps()
    }
}

/// Value an option with the default engine (100-step lattice for American style).
pub fn price(params: &OptionParameters) -> EngineResult<f64> {
    PricingEngine::default().price(params)
}

/// Sensitivities with the default engine.
pub fn greeks(params: &OptionParameters) -> EngineResult<Greeks> {
    PricingEngine::default().greeks(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_by_style() {
        let engine = PricingEngine::default();
        let eu = OptionParameters::european(OptionKind::Put, 100.0, 110.0, 1.0, 0.25, 0.05);
        let am = OptionParameters { style: ExerciseStyle::American, ..eu };
        assert_eq!(engine.model_for(eu.style).name(), "Black-Scholes");
        assert_eq!(engine.model_for(am.style).name(), "CRR-Lattice");
        let p_eu = engine.price(&eu).unwrap();
        let p_am = engine.price(&am).unwrap();
        assert!(p_am >= p_eu, "american put {p_am} must be worth at least european {p_eu}");
    }

    #[test]
    fn test_free_functions_match_engine() {
        let p = OptionParameters::european(OptionKind::Call, 100.0, 100.0, 1.0, 0.2, 0.05);
        let engine = PricingEngine::default();
        assert_eq!(price(&p).unwrap(), engine.price(&p).unwrap());
        assert_eq!(greeks(&p).unwrap(), engine.greeks(&p).unwrap());
    }

    #[test]
    fn test_engine_rejects_too_few_steps() {
        assert!(PricingEngine::new(1).is_err());
        assert_eq!(PricingEngine::new(64).unwrap().lattice_steps(), 64);
    }
}
