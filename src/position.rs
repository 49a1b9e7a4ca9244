use crate::error::{SimulationError, SimulationResult};
use crate::fees::{cash_to_quantity, compute_returns, quantity_to_cash};
use crate::models::PriceWindow;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Empty,
    Active,
    Closed,
}

impl PositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::Empty => "empty",
            PositionState::Active => "active",
            PositionState::Closed => "closed",
        }
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forecast of the best exit point. Advisory only: it never triggers a sale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledExit {
    pub date: i64,
    pub price: f64,
    pub returns: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub date: i64,
    pub price: f64,
    pub cash: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionExit {
    pub date: i64,
    pub price: f64,
    pub cash: f64,
    pub returns: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExitDecision {
    Sell,
    HoldWithForecast(ScheduledExit),
}

/// A single buy-then-sell trade. Moves `Empty -> Active -> Closed` and never back.
#[derive(Debug, Clone)]
pub struct Position {
    id: String,
    entry: Option<PositionEntry>,
    exit: Option<PositionExit>,
    scheduled_exit: Option<ScheduledExit>,
    stop_loss: Option<f64>,
}

impl Default for Position {
    fn default() -> Self {
        Self::new()
    }
}

impl Position {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entry: None,
            exit: None,
            scheduled_exit: None,
            stop_loss: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> PositionState {
        match (&self.entry, &self.exit) {
            (None, _) => PositionState::Empty,
            (Some(_), None) => PositionState::Active,
            (Some(_), Some(_)) => PositionState::Closed,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == PositionState::Active
    }

    pub fn is_closed(&self) -> bool {
        self.state() == PositionState::Closed
    }

    pub fn entry(&self) -> Option<&PositionEntry> {
        self.entry.as_ref()
    }

    pub fn exit(&self) -> Option<&PositionExit> {
        self.exit.as_ref()
    }

    pub fn scheduled_exit(&self) -> Option<&ScheduledExit> {
        self.scheduled_exit.as_ref()
    }

    pub fn stop_loss(&self) -> Option<f64> {
        self.stop_loss
    }

    /// Quantity bought at entry, zero while the position is still empty.
    pub fn quantity(&self) -> f64 {
        self.entry.map(|entry| entry.quantity).unwrap_or(0.0)
    }

    /// Realized cash returns, available once closed.
    pub fn returns(&self) -> Option<f64> {
        self.exit.map(|exit| exit.returns)
    }

    fn require_state(&self, expected: PositionState) -> SimulationResult<()> {
        let found = self.state();
        if found != expected {
            return Err(SimulationError::InvalidState {
                position_id: self.id.clone(),
                expected,
                found,
            });
        }
        Ok(())
    }

    fn active_entry(&self) -> SimulationResult<PositionEntry> {
        self.require_state(PositionState::Active)?;
        self.entry.ok_or_else(|| SimulationError::InvalidState {
            position_id: self.id.clone(),
            expected: PositionState::Active,
            found: PositionState::Empty,
        })
    }

    /// Spends `cash` at `price` and returns the quantity bought.
    pub fn buy(
        &mut self,
        date: i64,
        price: f64,
        cash: f64,
        fee: f64,
        scheduled_exit: Option<ScheduledExit>,
        stop_loss: Option<f64>,
    ) -> SimulationResult<f64> {
        self.require_state(PositionState::Empty)?;

        let quantity = cash_to_quantity(cash, price, fee);
        self.entry = Some(PositionEntry {
            date,
            price,
            cash,
            quantity,
        });
        self.scheduled_exit = scheduled_exit;
        self.stop_loss = stop_loss;
        Ok(quantity)
    }

    /// Sells the whole quantity at `price` and returns the cash obtained.
    pub fn sell(&mut self, date: i64, price: f64, fee: f64) -> SimulationResult<f64> {
        let entry = self.active_entry()?;

        let cash = quantity_to_cash(entry.quantity, price, fee);
        let returns = compute_returns(entry.cash, entry.quantity, price, fee);
        self.exit = Some(PositionExit {
            date,
            price,
            cash,
            returns,
        });
        Ok(cash)
    }

    /// Decides whether to exit now or keep holding towards the best lookahead sample.
    ///
    /// The stop-loss is checked first and wins over any forecast. Otherwise the
    /// position is held only while some lookahead sample beats both the immediate
    /// returns and zero.
    pub fn should_sell(
        &self,
        lookback: &PriceWindow<'_>,
        lookahead: &PriceWindow<'_>,
    ) -> SimulationResult<ExitDecision> {
        let entry = self.active_entry()?;
        let (current, current_fee) = lookback.last();
        let immediate_returns =
            compute_returns(entry.cash, entry.quantity, current.close, current_fee);

        if let Some(stop_loss) = self.stop_loss {
            if entry.cash > 0.0 && immediate_returns / entry.cash < stop_loss {
                return Ok(ExitDecision::Sell);
            }
        }

        let best = best_exit_in(lookahead, entry.cash, entry.quantity);
        if best.returns > immediate_returns && best.returns > 0.0 {
            Ok(ExitDecision::HoldWithForecast(best))
        } else {
            Ok(ExitDecision::Sell)
        }
    }

    /// Replaces the advisory exit of an active position.
    pub fn update_scheduled_exit(
        &mut self,
        scheduled_exit: Option<ScheduledExit>,
    ) -> SimulationResult<()> {
        self.require_state(PositionState::Active)?;
        self.scheduled_exit = scheduled_exit;
        Ok(())
    }
}

/// Best hypothetical exit over `window` for a holding of `quantity` bought with
/// `entry_cash`. Ties keep the earliest sample.
pub(crate) fn best_exit_in(window: &PriceWindow<'_>, entry_cash: f64, quantity: f64) -> ScheduledExit {
    let mut best: Option<ScheduledExit> = None;
    for (sample, fee) in window.iter() {
        let returns = compute_returns(entry_cash, quantity, sample.close, fee);
        let improves = match &best {
            None => true,
            Some(current) => returns > current.returns,
        };
        if improves {
            best = Some(ScheduledExit {
                date: sample.timestamp,
                price: sample.close,
                returns,
            });
        }
    }

    // PriceWindow guarantees at least one sample.
    best.unwrap_or(ScheduledExit {
        date: window.last().0.timestamp,
        price: window.last().0.close,
        returns: f64::NEG_INFINITY,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketSample;

    fn series(prices: &[f64]) -> Vec<MarketSample> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &price)| MarketSample::flat(i as i64 * 60, price))
            .collect()
    }

    fn bought(price: f64, cash: f64, fee: f64, stop_loss: Option<f64>) -> Position {
        let mut position = Position::new();
        position.buy(0, price, cash, fee, None, stop_loss).unwrap();
        position
    }

    #[test]
    fn new_position_is_empty() {
        let position = Position::new();
        assert_eq!(position.state(), PositionState::Empty);
        assert!(position.entry().is_none());
        assert!(position.exit().is_none());
        assert!(position.returns().is_none());
        assert_eq!(position.quantity(), 0.0);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(Position::new().id(), Position::new().id());
    }

    #[test]
    fn buy_records_entry_and_quantity() {
        let mut position = Position::new();
        let quantity = position.buy(2, 1000.0, 1000.0, 0.03, None, None).unwrap();
        let entry = position.entry().unwrap();
        assert_eq!(entry.date, 2);
        assert_eq!(entry.price, 1000.0);
        assert_eq!(entry.cash, 1000.0);
        assert!((quantity - 0.970873786407767).abs() < 1e-12);
        assert_eq!(position.state(), PositionState::Active);
    }

    #[test]
    fn sell_records_exit_cash_and_returns() {
        let mut position = Position::new();
        position.buy(2, 1000.0, 1000.0, 0.03, None, None).unwrap();
        let cash = position.sell(3, 1000.0, 0.03).unwrap();
        let exit = position.exit().unwrap();
        assert_eq!(exit.date, 3);
        assert_eq!(exit.price, 1000.0);
        assert!((cash - 941.747572815534).abs() < 1e-9);
        assert!((exit.cash - 941.747572815534).abs() < 1e-9);
        assert!((position.returns().unwrap() - -58.252427184466).abs() < 1e-9);
        assert!(position.is_closed());
    }

    #[test]
    fn lifecycle_violations_fail_with_invalid_state() {
        let mut position = Position::new();
        assert!(matches!(
            position.sell(1, 100.0, 0.0),
            Err(SimulationError::InvalidState {
                expected: PositionState::Active,
                found: PositionState::Empty,
                ..
            })
        ));

        position.buy(1, 100.0, 100.0, 0.0, None, None).unwrap();
        assert!(matches!(
            position.buy(2, 100.0, 100.0, 0.0, None, None),
            Err(SimulationError::InvalidState {
                found: PositionState::Active,
                ..
            })
        ));

        position.sell(3, 100.0, 0.0).unwrap();
        assert!(matches!(
            position.sell(4, 100.0, 0.0),
            Err(SimulationError::InvalidState {
                found: PositionState::Closed,
                ..
            })
        ));
        assert!(position.buy(5, 100.0, 100.0, 0.0, None, None).is_err());
        assert_eq!(position.exit().unwrap().date, 3);
    }

    #[test]
    fn stop_loss_overrides_favorable_forecast() {
        let position = bought(100.0, 1000.0, 0.0, Some(-0.05));
        let past = series(&[100.0, 90.0]);
        let future = series(&[90.0, 500.0, 1000.0]);
        let past_fees = vec![0.0; past.len()];
        let future_fees = vec![0.0; future.len()];
        let decision = position
            .should_sell(
                &PriceWindow::new(&past, &past_fees).unwrap(),
                &PriceWindow::new(&future, &future_fees).unwrap(),
            )
            .unwrap();
        assert_eq!(decision, ExitDecision::Sell);
    }

    #[test]
    fn holds_towards_best_future_sample() {
        let position = bought(100.0, 1000.0, 0.0, Some(-0.5));
        let past = series(&[100.0, 101.0]);
        let future = series(&[102.0, 110.0, 110.0, 105.0]);
        let past_fees = vec![0.0; past.len()];
        let future_fees = vec![0.0; future.len()];
        let decision = position
            .should_sell(
                &PriceWindow::new(&past, &past_fees).unwrap(),
                &PriceWindow::new(&future, &future_fees).unwrap(),
            )
            .unwrap();
        match decision {
            ExitDecision::HoldWithForecast(forecast) => {
                // First of the tied maxima.
                assert_eq!(forecast.date, 60);
                assert_eq!(forecast.price, 110.0);
                assert!((forecast.returns - 100.0).abs() < 1e-9);
            }
            ExitDecision::Sell => panic!("expected to hold"),
        }
    }

    #[test]
    fn sells_when_future_cannot_beat_now() {
        let position = bought(100.0, 1000.0, 0.0, None);
        let past = series(&[100.0, 120.0]);
        let future = series(&[119.0, 110.0]);
        let past_fees = vec![0.0; past.len()];
        let future_fees = vec![0.0; future.len()];
        let decision = position
            .should_sell(
                &PriceWindow::new(&past, &past_fees).unwrap(),
                &PriceWindow::new(&future, &future_fees).unwrap(),
            )
            .unwrap();
        assert_eq!(decision, ExitDecision::Sell);
    }

    #[test]
    fn sells_when_best_future_is_still_a_loss() {
        let position = bought(100.0, 1000.0, 0.0, None);
        let past = series(&[100.0, 80.0]);
        let future = series(&[85.0, 95.0]);
        let past_fees = vec![0.0; past.len()];
        let future_fees = vec![0.0; future.len()];
        let decision = position
            .should_sell(
                &PriceWindow::new(&past, &past_fees).unwrap(),
                &PriceWindow::new(&future, &future_fees).unwrap(),
            )
            .unwrap();
        assert_eq!(decision, ExitDecision::Sell);
    }

    #[test]
    fn should_sell_requires_active_position() {
        let position = Position::new();
        let past = series(&[100.0]);
        let fees = [0.0];
        let window = PriceWindow::new(&past, &fees).unwrap();
        assert!(position.should_sell(&window, &window).is_err());
    }

    #[test]
    fn scheduled_exit_updates_are_bookkeeping_only() {
        let mut position = Position::new();
        let forecast = ScheduledExit {
            date: 600,
            price: 120.0,
            returns: 20.0,
        };
        position
            .buy(0, 100.0, 100.0, 0.0, Some(forecast), Some(-0.1))
            .unwrap();
        assert_eq!(position.scheduled_exit(), Some(&forecast));

        position.update_scheduled_exit(None).unwrap();
        assert!(position.scheduled_exit().is_none());
        assert!(position.is_active());
        assert_eq!(position.stop_loss(), Some(-0.1));
    }

    #[test]
    fn closed_positions_reject_scheduled_exit_updates() {
        let forecast = ScheduledExit {
            date: 600,
            price: 120.0,
            returns: 20.0,
        };
        let mut position = Position::new();
        position
            .buy(0, 100.0, 100.0, 0.0, Some(forecast), None)
            .unwrap();
        position.sell(60, 110.0, 0.0).unwrap();

        let result = position.update_scheduled_exit(Some(ScheduledExit {
            date: 999,
            price: 1.0,
            returns: 5.0,
        }));
        assert!(matches!(
            result,
            Err(SimulationError::InvalidState {
                expected: PositionState::Active,
                found: PositionState::Closed,
                ..
            })
        ));
        assert_eq!(position.scheduled_exit(), Some(&forecast));

        let mut empty = Position::new();
        assert!(empty.update_scheduled_exit(None).is_err());
    }
}
