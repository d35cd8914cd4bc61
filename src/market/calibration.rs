use crate::errors::{EngineError, EngineResult};
use crate::market::process::{FlavorProcessState, ProcessParams, DEFAULT_PRICE_FLOOR};
use std::path::Path;

/// One row of a calibration file: a flavor's starting price and process constants.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FlavorCalibration {
    pub name: String,
    pub start_price: f64,
    #[serde(flatten)]
    pub params: ProcessParams,
}

impl FlavorCalibration {
    pub fn into_state(self) -> EngineResult<FlavorProcessState> {
        FlavorProcessState::new(self.name, self.start_price, self.params)
    }
}

/// The four flavors of a new game. Product-tuning constants, not invariants.
pub fn default_calibrations() -> Vec<FlavorCalibration> {
    let row = |name: &str, start: f64, mean: f64, kappa: f64, vol: f64, jump_p: f64, jump: f64| {
        FlavorCalibration {
            name: name.to_string(),
            start_price: start,
            params: ProcessParams {
                long_run_mean: mean,
                reversion_speed: kappa,
                volatility: vol,
                jump_probability: jump_p,
                jump_size: jump,
                floor: DEFAULT_PRICE_FLOOR,
            },
        }
    };
    vec![
        row("vanilla", 2.5, 2.5, 0.3, 0.35, 0.02, 0.25),
        row("chocolate", 3.0, 3.2, 0.25, 0.40, 0.02, 0.30),
        row("strawberry", 2.0, 2.0, 0.35, 0.30, 0.03, 0.35),
        row("mint", 1.5, 1.8, 0.20, 0.25, 0.05, 0.40),
    ]
}

pub fn default_flavors() -> EngineResult<Vec<FlavorProcessState>> {
    default_calibrations()
        .into_iter()
        .map(FlavorCalibration::into_state)
        .collect()
}

/// Load flavors from a JSON array of calibration rows.
pub fn load_flavors(path: &Path) -> EngineResult<Vec<FlavorProcessState>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Config(format!("read {}: {e}", path.display())))?;
    parse_flavors(&raw)
}

pub fn parse_flavors(json: &str) -> EngineResult<Vec<FlavorProcessState>> {
    let rows: Vec<FlavorCalibration> = serde_json::from_str(json)?;
    if rows.is_empty() {
        return Err(EngineError::Config("calibration lists no flavors".into()));
    }
    let mut names = std::collections::HashSet::new();
    for row in &rows {
        if !names.insert(row.name.as_str()) {
            return Err(EngineError::Config(format!("duplicate flavor {}", row.name)));
        }
    }
    rows.into_iter().map(FlavorCalibration::into_state).collect()
}
