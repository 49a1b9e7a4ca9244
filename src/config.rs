use crate::error::{SimulationError, SimulationResult};
use crate::models::RunParameters;
use crate::policy::PositionSizing;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::PathBuf;

pub const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";
pub const DEFAULT_RESULTS_DIR: &str = "results";
/// Last 5000 samples before the final one.
pub const DEFAULT_DATA_START_POSITION: i64 = -1 - 5000;
pub const DEFAULT_DATA_END_POSITION: i64 = -1;

pub const SETTING_KEYS: [&str; 7] = [
    "MARKET_DATA_FILE",
    "RESULTS_DIR",
    "DATA_START_POSITION",
    "DATA_END_POSITION",
    "LOOKAHEAD_SAMPLE_CAP",
    "POSITION_SIZING_FRACTION",
    "POSITION_SIZING_FLOOR",
];

/// Parameters of the simulation driver for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub predict_len: usize,
    pub fee: f64,
    /// Strides the lookahead window down to roughly this many samples when longer.
    pub lookahead_sample_cap: Option<usize>,
}

impl SimulationConfig {
    pub fn new(predict_len: usize, fee: f64) -> Self {
        Self {
            predict_len,
            fee,
            lookahead_sample_cap: None,
        }
    }

    pub fn with_lookahead_sample_cap(mut self, cap: Option<usize>) -> Self {
        self.lookahead_sample_cap = cap;
        self
    }

    pub fn validate(&self) -> SimulationResult<()> {
        if self.predict_len == 0 {
            return Err(SimulationError::config(
                "predict_len must be at least 1, the lookahead window would be empty",
            ));
        }
        if !self.fee.is_finite() || !(0.0..1.0).contains(&self.fee) {
            return Err(SimulationError::config(format!(
                "fee must be within [0, 1) (value: {})",
                self.fee
            )));
        }
        if self.lookahead_sample_cap == Some(0) {
            return Err(SimulationError::config("lookahead sample cap must be at least 1"));
        }
        Ok(())
    }
}

impl From<&RunParameters> for SimulationConfig {
    fn from(parameters: &RunParameters) -> Self {
        Self::new(parameters.predict_len, parameters.fee)
    }
}

/// Process-level settings: where data and results live and which slice of the
/// series to simulate.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub market_data_file: PathBuf,
    pub results_dir: PathBuf,
    pub data_start_position: i64,
    pub data_end_position: i64,
    pub lookahead_sample_cap: Option<usize>,
    pub position_sizing: PositionSizing,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            market_data_file: PathBuf::from(DEFAULT_MARKET_DATA_FILE),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            data_start_position: DEFAULT_DATA_START_POSITION,
            data_end_position: DEFAULT_DATA_END_POSITION,
            lookahead_sample_cap: None,
            position_sizing: PositionSizing::default(),
        }
    }
}

impl RuntimeSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let market_data_file = optional_setting(settings, "MARKET_DATA_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.market_data_file);
        let results_dir = optional_setting(settings, "RESULTS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.results_dir);
        let data_start_position =
            setting_i64_or(settings, "DATA_START_POSITION", defaults.data_start_position)?;
        let data_end_position =
            setting_i64_or(settings, "DATA_END_POSITION", defaults.data_end_position)?;
        let lookahead_sample_cap = match optional_setting(settings, "LOOKAHEAD_SAMPLE_CAP") {
            Some(_) => {
                let cap = setting_usize_or(settings, "LOOKAHEAD_SAMPLE_CAP", 0, 0)?;
                (cap > 0).then_some(cap)
            }
            None => None,
        };
        let position_sizing = PositionSizing {
            fraction: setting_f64_or(
                settings,
                "POSITION_SIZING_FRACTION",
                defaults.position_sizing.fraction,
                Some(0.0),
                Some(1.0),
            )?,
            floor: setting_f64_or(
                settings,
                "POSITION_SIZING_FLOOR",
                defaults.position_sizing.floor,
                Some(0.0),
                None,
            )?,
        };

        Ok(Self {
            market_data_file,
            results_dir,
            data_start_position,
            data_end_position,
            lookahead_sample_cap,
            position_sizing,
        })
    }

    /// Collects the known settings from the process environment.
    pub fn settings_from_env() -> HashMap<String, String> {
        SETTING_KEYS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect()
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_i64_or(settings: &HashMap<String, String>, key: &str, default: i64) -> Result<i64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    raw.parse::<i64>()
        .map_err(|_| anyhow!("Setting {} must be an integer (value: {})", key, raw))
}

fn setting_usize_or(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

fn setting_f64_or(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_settings_fall_back_to_defaults() {
        let parsed = RuntimeSettings::from_settings_map(&HashMap::new()).unwrap();
        assert_eq!(parsed, RuntimeSettings::default());
        assert_eq!(parsed.data_start_position, -5001);
    }

    #[test]
    fn settings_override_defaults() {
        let parsed = RuntimeSettings::from_settings_map(&settings(&[
            ("MARKET_DATA_FILE", " /tmp/btc.bin "),
            ("RESULTS_DIR", "out"),
            ("DATA_START_POSITION", "100"),
            ("DATA_END_POSITION", "-10"),
            ("LOOKAHEAD_SAMPLE_CAP", "60"),
            ("POSITION_SIZING_FRACTION", "0.25"),
            ("POSITION_SIZING_FLOOR", "50"),
        ]))
        .unwrap();

        assert_eq!(parsed.market_data_file, PathBuf::from("/tmp/btc.bin"));
        assert_eq!(parsed.results_dir, PathBuf::from("out"));
        assert_eq!(parsed.data_start_position, 100);
        assert_eq!(parsed.data_end_position, -10);
        assert_eq!(parsed.lookahead_sample_cap, Some(60));
        assert_eq!(parsed.position_sizing.fraction, 0.25);
        assert_eq!(parsed.position_sizing.floor, 50.0);
    }

    #[test]
    fn zero_cap_disables_downsampling() {
        let parsed =
            RuntimeSettings::from_settings_map(&settings(&[("LOOKAHEAD_SAMPLE_CAP", "0")]))
                .unwrap();
        assert_eq!(parsed.lookahead_sample_cap, None);
    }

    #[test]
    fn malformed_settings_are_rejected() {
        assert!(
            RuntimeSettings::from_settings_map(&settings(&[("DATA_START_POSITION", "abc")]))
                .is_err()
        );
        assert!(
            RuntimeSettings::from_settings_map(&settings(&[("LOOKAHEAD_SAMPLE_CAP", "1.5")]))
                .is_err()
        );
        assert!(RuntimeSettings::from_settings_map(&settings(&[(
            "POSITION_SIZING_FRACTION",
            "2"
        )]))
        .is_err());
    }

    #[test]
    fn simulation_config_validation() {
        assert!(SimulationConfig::new(10, 0.0).validate().is_ok());
        assert!(SimulationConfig::new(0, 0.0).validate().is_err());
        assert!(SimulationConfig::new(10, -0.1).validate().is_err());
        assert!(SimulationConfig::new(10, 1.0).validate().is_err());
        assert!(SimulationConfig::new(10, 0.0)
            .with_lookahead_sample_cap(Some(0))
            .validate()
            .is_err());
    }
}
