use crate::error::{SimulationError, SimulationResult};
use serde::{Deserialize, Serialize};

/// One OHLCV bar of the input series. `timestamp` is unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketSample {
    #[serde(rename = "unix")]
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl MarketSample {
    pub fn flat(timestamp: i64, price: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }
}

/// A contiguous view over samples with the fee that applies to each of them.
#[derive(Debug, Clone, Copy)]
pub struct PriceWindow<'a> {
    samples: &'a [MarketSample],
    fees: &'a [f64],
}

impl<'a> PriceWindow<'a> {
    pub fn new(samples: &'a [MarketSample], fees: &'a [f64]) -> SimulationResult<Self> {
        if samples.is_empty() {
            return Err(SimulationError::config("price window collapsed to zero length"));
        }
        if samples.len() != fees.len() {
            return Err(SimulationError::config(format!(
                "price window has {} samples but {} fees",
                samples.len(),
                fees.len()
            )));
        }
        Ok(Self { samples, fees })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &'a [MarketSample] {
        self.samples
    }

    /// The most recent sample and its fee. Windows are never empty.
    pub fn last(&self) -> (&'a MarketSample, f64) {
        let index = self.samples.len() - 1;
        (&self.samples[index], self.fees[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a MarketSample, f64)> + 'a {
        self.samples.iter().zip(self.fees.iter().copied())
    }
}

/// The six inputs of one simulation run, as swept by a grid search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub predict_len: usize,
    pub init_cash: f64,
    pub init_crypto: f64,
    pub fee: f64,
    pub min_expected_returns: f64,
    pub stop_loss: f64,
}

impl RunParameters {
    pub fn validate(&self) -> SimulationResult<()> {
        if self.predict_len == 0 {
            return Err(SimulationError::config("predict_len must be at least 1"));
        }
        if !self.init_cash.is_finite() || self.init_cash <= 0.0 {
            return Err(SimulationError::config(format!(
                "init_cash must be positive (value: {})",
                self.init_cash
            )));
        }
        if !self.init_crypto.is_finite() || self.init_crypto < 0.0 {
            return Err(SimulationError::config(format!(
                "init_crypto must not be negative (value: {})",
                self.init_crypto
            )));
        }
        if !self.fee.is_finite() || !(0.0..1.0).contains(&self.fee) {
            return Err(SimulationError::config(format!(
                "fee must be within [0, 1) (value: {})",
                self.fee
            )));
        }
        if !self.min_expected_returns.is_finite() || !self.stop_loss.is_finite() {
            return Err(SimulationError::config(
                "min_expected_returns and stop_loss must be finite",
            ));
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        format!(
            "predict_len={}, init_cash={}, init_crypto={}, fee={}, min_expected_returns={}, stop_loss={}",
            self.predict_len,
            self.init_cash,
            self.init_crypto,
            self.fee,
            self.min_expected_returns,
            self.stop_loss
        )
    }
}

/// One persisted grid-search row. `returns` is empty when the run failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSearchRow {
    pub predict_len: usize,
    pub init_cash: f64,
    pub init_crypto: f64,
    pub fee: f64,
    pub min_expected_returns: f64,
    pub stop_loss: f64,
    pub returns: Option<f64>,
}

impl GridSearchRow {
    pub fn new(parameters: &RunParameters, returns: Option<f64>) -> Self {
        Self {
            predict_len: parameters.predict_len,
            init_cash: parameters.init_cash,
            init_crypto: parameters.init_crypto,
            fee: parameters.fee,
            min_expected_returns: parameters.min_expected_returns,
            stop_loss: parameters.stop_loss,
            returns,
        }
    }

    pub fn parameters(&self) -> RunParameters {
        RunParameters {
            predict_len: self.predict_len,
            init_cash: self.init_cash,
            init_crypto: self.init_crypto,
            fee: self.fee,
            min_expected_returns: self.min_expected_returns,
            stop_loss: self.stop_loss,
        }
    }
}
