use crate::error::{SimulationError, SimulationResult};
use crate::fees::quantity_to_cash;
use crate::position::{Position, ScheduledExit};

/// Cash and crypto ledger of one simulation run, owning every position it opened.
#[derive(Debug, Clone)]
pub struct Portfolio {
    cash: f64,
    initial_cash: f64,
    crypto: f64,
    initial_crypto: f64,
    positions: Vec<Position>,
    trades: usize,
    cash_history: Vec<f64>,
    crypto_history: Vec<f64>,
    value_history: Vec<f64>,
    returns_history: Vec<f64>,
}

impl Portfolio {
    pub fn new(cash: f64, crypto: f64) -> Self {
        Self {
            cash,
            initial_cash: cash,
            crypto,
            initial_crypto: crypto,
            positions: Vec::new(),
            trades: 0,
            cash_history: vec![cash],
            crypto_history: vec![crypto],
            value_history: Vec::new(),
            returns_history: Vec::new(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn initial_cash(&self) -> f64 {
        self.initial_cash
    }

    pub fn crypto(&self) -> f64 {
        self.crypto
    }

    pub fn initial_crypto(&self) -> f64 {
        self.initial_crypto
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn active_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|position| position.is_active())
    }

    pub fn trades(&self) -> usize {
        self.trades
    }

    pub fn cash_history(&self) -> &[f64] {
        &self.cash_history
    }

    pub fn crypto_history(&self) -> &[f64] {
        &self.crypto_history
    }

    pub fn value_history(&self) -> &[f64] {
        &self.value_history
    }

    pub fn returns_history(&self) -> &[f64] {
        &self.returns_history
    }

    /// Opens a new position with `cash` taken from the free balance.
    pub fn buy(
        &mut self,
        date: i64,
        price: f64,
        cash: f64,
        fee: f64,
        scheduled_exit: Option<ScheduledExit>,
        stop_loss: Option<f64>,
    ) -> SimulationResult<f64> {
        if cash > self.cash {
            return Err(SimulationError::InsufficientFunds {
                requested: cash,
                available: self.cash,
            });
        }

        let mut position = Position::new();
        let quantity = position.buy(date, price, cash, fee, scheduled_exit, stop_loss)?;

        self.cash -= cash;
        self.cash_history.push(self.cash);
        self.crypto += quantity;
        self.crypto_history.push(self.crypto);
        self.positions.push(position);
        self.trades += 1;
        Ok(quantity)
    }

    /// Closes the position at `index` and credits its proceeds.
    pub fn sell(&mut self, index: usize, date: i64, price: f64, fee: f64) -> SimulationResult<f64> {
        let position = self.positions.get_mut(index).ok_or_else(|| {
            SimulationError::config(format!("no position at index {}", index))
        })?;
        let quantity = position.quantity();
        let cash = position.sell(date, price, fee)?;

        self.crypto -= quantity;
        self.crypto_history.push(self.crypto);
        self.cash += cash;
        self.cash_history.push(self.cash);
        self.trades += 1;
        Ok(cash)
    }

    pub fn update_scheduled_exit(
        &mut self,
        index: usize,
        scheduled_exit: Option<ScheduledExit>,
    ) -> SimulationResult<()> {
        let position = self.positions.get_mut(index).ok_or_else(|| {
            SimulationError::config(format!("no position at index {}", index))
        })?;
        position.update_scheduled_exit(scheduled_exit)
    }

    /// Liquidates the whole crypto balance in one lump sum.
    ///
    /// Still-active positions are closed at the same price for their own returns
    /// record only; their proceeds are not credited again.
    pub fn sell_all(&mut self, date: i64, price: f64, fee: f64) -> SimulationResult<f64> {
        let cash = quantity_to_cash(self.crypto, price, fee);
        self.cash += cash;
        self.cash_history.push(self.cash);
        self.crypto = 0.0;
        self.crypto_history.push(self.crypto);

        for position in self.positions.iter_mut().filter(|p| p.is_active()) {
            position.sell(date, price, fee)?;
        }

        Ok(cash)
    }

    pub fn get_portfolio_value(&self, price: f64, fee: f64) -> f64 {
        self.cash + quantity_to_cash(self.crypto, price, fee)
    }

    pub fn get_portfolio_returns(&self, price: f64, fee: f64) -> f64 {
        self.get_portfolio_value(price, fee) - self.initial_cash
    }

    pub fn get_portfolio_returns_pct(&self, price: f64, fee: f64) -> f64 {
        self.get_portfolio_returns(price, fee) / self.initial_cash
    }

    /// Appends the value and returns observed at the end of a simulation step.
    pub fn record_step(&mut self, price: f64, fee: f64) {
        self.value_history.push(self.get_portfolio_value(price, fee));
        self.returns_history.push(self.get_portfolio_returns(price, fee));
    }
}
