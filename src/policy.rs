use crate::error::SimulationResult;
use crate::fees::cash_to_quantity;
use crate::models::PriceWindow;
use crate::portfolio::Portfolio;
use crate::position::{best_exit_in, ExitDecision, ScheduledExit};

/// Stop-loss applied to new positions unless overridden. A good value keeps
/// `abs(stop_loss) > 2 * fee`.
pub const DEFAULT_STOP_LOSS: f64 = -2.0;

/// Fixed-fractional sizing of new positions with a cash floor, capped at the free balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSizing {
    pub fraction: f64,
    pub floor: f64,
}

impl Default for PositionSizing {
    fn default() -> Self {
        Self {
            fraction: 0.10,
            floor: 300.0,
        }
    }
}

impl PositionSizing {
    pub fn new_position_cash(&self, available_cash: f64) -> f64 {
        available_cash.min((available_cash * self.fraction).max(self.floor))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryDecision {
    Buy(ScheduledExit),
    NoAction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub closed_positions: usize,
    pub opened_position: bool,
}

/// Lookahead trading rule. Holds parameters only; all state lives in the portfolio.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    min_expected_returns: f64,
    stop_loss: Option<f64>,
    sizing: PositionSizing,
}

impl Policy {
    pub fn new(min_expected_returns: f64) -> Self {
        Self {
            min_expected_returns,
            stop_loss: Some(DEFAULT_STOP_LOSS),
            sizing: PositionSizing::default(),
        }
    }

    pub fn with_stop_loss(mut self, stop_loss: Option<f64>) -> Self {
        self.stop_loss = stop_loss;
        self
    }

    pub fn with_sizing(mut self, sizing: PositionSizing) -> Self {
        self.sizing = sizing;
        self
    }

    pub fn min_expected_returns(&self) -> f64 {
        self.min_expected_returns
    }

    pub fn stop_loss(&self) -> Option<f64> {
        self.stop_loss
    }

    pub fn sizing(&self) -> PositionSizing {
        self.sizing
    }

    /// Evaluates buying `entry_cash` worth at the current sample and selling at
    /// the best lookahead sample.
    pub fn should_buy(
        &self,
        entry_cash: f64,
        lookback: &PriceWindow<'_>,
        lookahead: &PriceWindow<'_>,
    ) -> EntryDecision {
        let (current, current_fee) = lookback.last();
        let quantity = cash_to_quantity(entry_cash, current.close, current_fee);
        let best = best_exit_in(lookahead, entry_cash, quantity);

        if best.returns > self.min_expected_returns {
            EntryDecision::Buy(best)
        } else {
            EntryDecision::NoAction
        }
    }

    /// Runs one step: closes positions that should exit, opens at most one new
    /// position, then records the portfolio value and returns.
    ///
    /// No position is opened when the sized cash is zero, even if a negative
    /// `min_expected_returns` would accept it. An empty balance therefore never
    /// adds to the portfolio trade count.
    pub fn apply_policy(
        &self,
        portfolio: &mut Portfolio,
        lookback: &PriceWindow<'_>,
        lookahead: &PriceWindow<'_>,
    ) -> SimulationResult<StepOutcome> {
        let (current, current_fee) = lookback.last();
        let current_date = current.timestamp;
        let current_price = current.close;
        let mut outcome = StepOutcome::default();

        let active_indices: Vec<usize> = portfolio
            .positions()
            .iter()
            .enumerate()
            .filter(|(_, position)| position.is_active())
            .map(|(index, _)| index)
            .collect();

        for index in active_indices {
            let decision = portfolio.positions()[index].should_sell(lookback, lookahead)?;
            match decision {
                ExitDecision::Sell => {
                    portfolio.sell(index, current_date, current_price, current_fee)?;
                    outcome.closed_positions += 1;
                }
                ExitDecision::HoldWithForecast(forecast) => {
                    portfolio.update_scheduled_exit(index, Some(forecast))?;
                }
            }
        }

        let new_position_cash = self.sizing.new_position_cash(portfolio.cash());
        if new_position_cash > 0.0 {
            if let EntryDecision::Buy(scheduled_exit) =
                self.should_buy(new_position_cash, lookback, lookahead)
            {
                portfolio.buy(
                    current_date,
                    current_price,
                    new_position_cash,
                    current_fee,
                    Some(scheduled_exit),
                    self.stop_loss,
                )?;
                outcome.opened_position = true;
            }
        }

        portfolio.record_step(current_price, current_fee);
        Ok(outcome)
    }
}
