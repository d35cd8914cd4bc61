use crate::errors::{EngineError, EngineResult};
use crate::market::calibration;
use crate::market::FlavorProcessState;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub seed: u64,
    pub tick_interval_ms: u64,
    /// Simulated days per tick
    pub dt_days: f64,
    /// Game day budget; 0 runs until shutdown
    pub max_days: u64,
    pub risk_free_rate: f64,
    pub lattice_steps: usize,
    /// Quote volatility until a flavor's realized estimate is ready
    pub quote_volatility: f64,
    pub quote_expiry_days: u64,
    pub calibration_path: Option<PathBuf>,
    /// Row-major flavor correlation matrix
    pub correlation: Option<Vec<f64>>,
    pub data_dir: PathBuf,
    pub server_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tick_interval_ms: 1000,
            dt_days: 1.0,
            max_days: 0,
            risk_free_rate: 0.05,
            lattice_steps: crate::models::binomial::DEFAULT_STEPS,
            quote_volatility: 0.35,
            quote_expiry_days: 30,
            calibration_path: None,
            correlation: None,
            data_dir: PathBuf::from("data"),
            server_port: 3001,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();

        let cfg = Self {
            seed: parse_env("SIM_SEED", "42")?,
            tick_interval_ms: parse_env("TICK_INTERVAL_MS", "1000")?,
            dt_days: parse_env("SIM_DT_DAYS", "1.0")?,
            max_days: parse_env("MAX_DAYS", "0")?,
            risk_free_rate: parse_env("RISK_FREE_RATE", "0.05")?,
            lattice_steps: parse_env("LATTICE_STEPS", "100")?,
            quote_volatility: parse_env("QUOTE_VOLATILITY", "0.35")?,
            quote_expiry_days: parse_env("QUOTE_EXPIRY_DAYS", "30")?,
            calibration_path: std::env::var("FLAVOR_CALIBRATION").ok().map(PathBuf::from),
            correlation: std::env::var("FLAVOR_CORRELATION")
                .ok()
                .map(|raw| parse_matrix(&raw))
                .transpose()?,
            data_dir: PathBuf::from(env_var_or("DATA_DIR", "data")),
            server_port: parse_env("SERVER_PORT", "3001")?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !self.dt_days.is_finite() || self.dt_days <= 0.0 {
            return Err(EngineError::Config(format!("SIM_DT_DAYS must be > 0, got {}", self.dt_days)));
        }
        if self.tick_interval_ms == 0 {
            return Err(EngineError::Config("TICK_INTERVAL_MS must be > 0".into()));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(EngineError::Config("RISK_FREE_RATE must be finite".into()));
        }
        let max_steps = crate::models::binomial::MAX_STEPS;
        if !(2..=max_steps).contains(&self.lattice_steps) {
            return Err(EngineError::Config(format!(
                "LATTICE_STEPS must be in [2, {max_steps}], got {}",
                self.lattice_steps
            )));
        }
        if !self.quote_volatility.is_finite() || self.quote_volatility < crate::models::MIN_VOLATILITY {
            return Err(EngineError::Config(format!(
                "QUOTE_VOLATILITY must be positive, got {}",
                self.quote_volatility
            )));
        }
        if self.quote_expiry_days == 0 {
            return Err(EngineError::Config("QUOTE_EXPIRY_DAYS must be > 0".into()));
        }
        Ok(())
    }

    /// Starting flavors: the calibration file when configured, else the built-in four.
    pub fn flavors(&self) -> EngineResult<Vec<FlavorProcessState>> {
        match &self.calibration_path {
            Some(path) => calibration::load_flavors(path),
            None => calibration::default_flavors(),
        }
    }
}

fn parse_env<T>(key: &str, default: &str) -> EngineResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var_or(key, default)
        .parse::<T>()
        .map_err(|e| EngineError::Config(format!("{key}: {e}")))
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// "1,0.3,0.3,1" -> [1.0, 0.3, 0.3, 1.0]. Shape is checked against the flavors later.
fn parse_matrix(raw: &str) -> EngineResult<Vec<f64>> {
    raw.split(',')
        .map(|s| {
            s.trim()
                .parse::<f64>()
                .map_err(|e| EngineError::Config(format!("FLAVOR_CORRELATION: {e}")))
        })
        .collect()
}
