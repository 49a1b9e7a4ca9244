use crate::config::SimulationConfig;
use crate::error::{SimulationError, SimulationResult};
use crate::models::{MarketSample, PriceWindow, RunParameters};
use crate::policy::{Policy, PositionSizing};
use crate::portfolio::Portfolio;
use log::{debug, info, log_enabled, Level};
use serde::{Deserialize, Serialize};

/// Outcome of a full simulation run.
///
/// Value and returns come from the last recorded step; `settled_cash` is the free
/// balance after the terminal liquidation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub final_portfolio_value: f64,
    pub final_portfolio_returns: f64,
    pub final_portfolio_returns_pct: f64,
    pub trades: usize,
    pub settled_cash: f64,
}

/// Walks a price series step by step, applying the policy to the portfolio.
pub struct Optimizer {
    portfolio: Portfolio,
    policy: Policy,
    config: SimulationConfig,
}

impl Optimizer {
    pub fn new(
        portfolio: Portfolio,
        policy: Policy,
        config: SimulationConfig,
    ) -> SimulationResult<Self> {
        config.validate()?;
        let init_cash = portfolio.initial_cash();
        if !init_cash.is_finite() || init_cash <= 0.0 {
            return Err(SimulationError::config(format!(
                "init_cash must be positive (value: {})",
                init_cash
            )));
        }
        let init_crypto = portfolio.initial_crypto();
        if !init_crypto.is_finite() || init_crypto < 0.0 {
            return Err(SimulationError::config(format!(
                "init_crypto must not be negative (value: {})",
                init_crypto
            )));
        }
        Ok(Self {
            portfolio,
            policy,
            config,
        })
    }

    /// Builds the portfolio, policy and driver configuration of one grid-search run.
    pub fn from_parameters(
        parameters: &RunParameters,
        sizing: PositionSizing,
        lookahead_sample_cap: Option<usize>,
    ) -> SimulationResult<Self> {
        parameters.validate()?;
        let portfolio = Portfolio::new(parameters.init_cash, parameters.init_crypto);
        let policy = Policy::new(parameters.min_expected_returns)
            .with_stop_loss(Some(parameters.stop_loss))
            .with_sizing(sizing);
        let config =
            SimulationConfig::from(parameters).with_lookahead_sample_cap(lookahead_sample_cap);
        Self::new(portfolio, policy, config)
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn into_portfolio(self) -> Portfolio {
        self.portfolio
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Runs the policy over every step `1..N` and liquidates whatever is still held
    /// at the last sample.
    pub fn iterate_policy(&mut self, samples: &[MarketSample]) -> SimulationResult<RunSummary> {
        let sample_count = samples.len();
        if sample_count < 2 {
            return Err(SimulationError::config(format!(
                "at least 2 samples are required to simulate a step (got {})",
                sample_count
            )));
        }

        info!(
            "Estimating returns for {} steps ({:.1} hours or {:.2} days) of data",
            sample_count,
            sample_count as f64 / 60.0,
            sample_count as f64 / 60.0 / 24.0
        );

        let fee = self.config.fee;
        let fees = vec![fee; sample_count];
        let mut strided: Vec<MarketSample> = Vec::new();

        for step in 1..sample_count {
            let lookback = PriceWindow::new(&samples[..step], &fees[..step])?;
            let lookahead_end = (step + self.config.predict_len).min(sample_count);
            let upcoming = &samples[step..lookahead_end];

            let lookahead = match self.config.lookahead_sample_cap {
                Some(cap) if upcoming.len() > cap => {
                    let stride = upcoming.len() / cap;
                    strided.clear();
                    strided.extend(upcoming.iter().step_by(stride).copied());
                    PriceWindow::new(&strided, &fees[..strided.len()])?
                }
                _ => PriceWindow::new(upcoming, &fees[step..lookahead_end])?,
            };

            if log_enabled!(Level::Debug) {
                debug!(
                    "{} Price: {} | Start: Cash: {} | Crypto: {} | Portfolio value: {} | Portfolio returns: {} | Trades: {}",
                    step,
                    samples[step].close,
                    self.portfolio.cash(),
                    self.portfolio.crypto(),
                    self.portfolio
                        .value_history()
                        .last()
                        .copied()
                        .unwrap_or(self.portfolio.cash()),
                    self.portfolio.returns_history().last().copied().unwrap_or(0.0),
                    self.portfolio.trades()
                );
            }

            let outcome = self
                .policy
                .apply_policy(&mut self.portfolio, &lookback, &lookahead)?;

            if log_enabled!(Level::Debug) {
                debug!(
                    "{} End: Cash: {} | Crypto: {} | Portfolio value: {} | Portfolio returns: {} | Trades: {} | Closed: {} | Opened: {}",
                    step,
                    self.portfolio.cash(),
                    self.portfolio.crypto(),
                    self.portfolio.value_history().last().copied().unwrap_or_default(),
                    self.portfolio.returns_history().last().copied().unwrap_or_default(),
                    self.portfolio.trades(),
                    outcome.closed_positions,
                    outcome.opened_position
                );
            }
        }

        let last = &samples[sample_count - 1];
        self.portfolio.sell_all(last.timestamp, last.close, fee)?;

        let final_portfolio_value = self
            .portfolio
            .value_history()
            .last()
            .copied()
            .ok_or_else(|| SimulationError::config("simulation recorded no steps"))?;
        let final_portfolio_returns = self
            .portfolio
            .returns_history()
            .last()
            .copied()
            .ok_or_else(|| SimulationError::config("simulation recorded no steps"))?;

        Ok(RunSummary {
            final_portfolio_value,
            final_portfolio_returns,
            final_portfolio_returns_pct: final_portfolio_returns / self.portfolio.initial_cash(),
            trades: self.portfolio.trades(),
            settled_cash: self.portfolio.cash(),
        })
    }
}

/// Runs one complete simulation and hands back the final portfolio for inspection.
pub fn run_simulation(
    samples: &[MarketSample],
    parameters: &RunParameters,
    sizing: PositionSizing,
    lookahead_sample_cap: Option<usize>,
) -> SimulationResult<(RunSummary, Portfolio)> {
    let mut optimizer = Optimizer::from_parameters(parameters, sizing, lookahead_sample_cap)?;
    let summary = optimizer.iterate_policy(samples)?;
    Ok((summary, optimizer.into_portfolio()))
}
